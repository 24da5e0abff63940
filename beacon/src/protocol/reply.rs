use super::frame::encode;
use super::{ProtocolError, join};

use std::fmt;
use std::str::FromStr;

/// Tag opening every reply payload.
pub const REPLY_TAG: &str = "REPLY";

macro_rules! reply_codes {
    ($($variant:ident => $name:literal,)*) => {
        /// Outcome of a request, as sent back to the client.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ReplyCode {
            $($variant,)*
        }

        impl ReplyCode {
            /// Every code, in wire order.
            pub const ALL: &'static [ReplyCode] = &[$(ReplyCode::$variant,)*];

            /// The name of the code on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(ReplyCode::$variant => $name,)*
                }
            }
        }

        impl FromStr for ReplyCode {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(ReplyCode::$variant),)*
                    other => Err(ProtocolError::UnknownTag(other.to_string())),
                }
            }
        }
    };
}

reply_codes! {
    EmailTaken => "EMAIL_TAKEN",
    LoginSuccessful => "LOGIN_SUCCESSFUL",
    CredentialErrorEmail => "CREDENTIAL_ERROR_EMAIL",
    CredentialErrorPassword => "CREDENTIAL_ERROR_PASSWORD",
    RegistrationSuccessful => "REGISTRATION_SUCCESSFUL",
    NotLoggedIn => "NOT_LOGGED_IN",
    WrongUserId => "WRONG_USER_ID",
    LocationTransferSuccess => "LOCATION_TRANSFER_SUCCESS",
    CircleCreateSuccessful => "CIRCLE_CREATE_SUCCESSFUL",
    JoinRequestSuccessful => "JOIN_REQUEST_SUCCESSFUL",
    JoinRequestConfirmedSuccessfully => "JOIN_REQUEST_CONFIRMED_SUCCESSFULLY",
    JoinRequestDeclinedSuccessfully => "JOIN_REQUEST_DECLINED_SUCCESSFULLY",
    JoinRequestError => "JOIN_REQUEST_ERROR",
    AddFriendSuccessful => "ADD_FRIEND_SUCCESSFUL",
    NotPartOfCircle => "NOT_PART_OF_CIRCLE",
    FriendNotFound => "FRIEND_NOT_FOUND",
    RemoveFriendSuccessful => "REMOVE_FRIEND_SUCCESSFUL",
    CircleDeleteSuccessful => "CIRCLE_DELETE_SUCCESSFUL",
    DataRequestSuccessful => "DATA_REQUEST_SUCCESSFUL",
    DataRequestError => "DATA_REQUEST_ERROR",
    UnknownError => "UNKNOWN_ERROR",
    UnknownRequestFormat => "UNKNOWN_REQUEST_FORMAT",
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply: a code plus ordered message parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub parts: Vec<String>,
}

impl Reply {
    pub fn new(code: ReplyCode) -> Self {
        Self {
            code,
            parts: Vec::new(),
        }
    }

    pub fn with_parts<I, S>(code: ReplyCode, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, part: impl Into<String>) {
        self.parts.push(part.into());
    }

    /// `REPLY`, the code, then every part, joined by the delimiter.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut fields = Vec::with_capacity(self.parts.len() + 2);
        fields.push(REPLY_TAG);
        fields.push(self.code.as_str());
        fields.extend(self.parts.iter().map(String::as_str));

        join(&fields)
    }

    /// The payload with its length prefix.
    pub fn to_frame(&self) -> Vec<u8> {
        encode(&self.to_payload())
    }

    /// Parses a reply payload. Parts are kept verbatim, empty ones included.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        let mut fields = text.split(super::DELIMITER);

        match fields.next() {
            Some(REPLY_TAG) => {}
            Some(other) => return Err(ProtocolError::UnknownTag(other.to_string())),
            None => return Err(ProtocolError::Empty),
        }

        let code = fields
            .next()
            .ok_or(ProtocolError::FieldCount {
                tag: REPLY_TAG,
                expected: 1,
                found: 0,
            })?
            .parse()?;

        Ok(Self::with_parts(code, fields))
    }
}
