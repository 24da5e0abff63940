use super::{ProtocolError, fields, join};

use std::str::FromStr;

/// A client request, as parsed from one frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    EmailTaken {
        email: String,
    },
    Login {
        email: String,
        secret: String,
    },
    Register {
        email: String,
        first_name: String,
        last_name: String,
        secret: String,
    },
    Location {
        user_id: i64,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        time_recorded: i64,
    },
    CreateCircle {
        name: String,
    },
    JoinRequests,
    ConfirmJoinRequest {
        circle_id: i64,
    },
    DeclineJoinRequest {
        circle_id: i64,
    },
    AddCircleMember {
        circle_id: i64,
        email: String,
    },
    RemoveCircleMember {
        circle_id: i64,
        user_id: i64,
    },
    DeleteCircle {
        circle_id: i64,
    },
    CircleData,
}

impl Request {
    /// Parses a frame payload.
    ///
    /// The tag must be known and the field count must match it exactly.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let fields = fields(payload)?;
        let (tag, args) = (fields[0], &fields[1..]);

        let request = match tag {
            "EMAIL_TAKEN" => {
                let [email] = arity("EMAIL_TAKEN", args)?;
                Request::EmailTaken {
                    email: email.to_string(),
                }
            }
            "LOGIN" => {
                let [email, secret] = arity("LOGIN", args)?;
                Request::Login {
                    email: email.to_string(),
                    secret: secret.to_string(),
                }
            }
            "REGISTER" => {
                let [email, first_name, last_name, secret] = arity("REGISTER", args)?;
                Request::Register {
                    email: email.to_string(),
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                    secret: secret.to_string(),
                }
            }
            "LOCATION" => {
                let [user_id, latitude, longitude, accuracy, time_recorded] =
                    arity("LOCATION", args)?;
                Request::Location {
                    user_id: number("user_id", user_id)?,
                    latitude: number("latitude", latitude)?,
                    longitude: number("longitude", longitude)?,
                    accuracy: number("accuracy", accuracy)?,
                    time_recorded: number("time_recorded", time_recorded)?,
                }
            }
            "CREATE_CIRCLE" => {
                let [name] = arity("CREATE_CIRCLE", args)?;
                Request::CreateCircle {
                    name: name.to_string(),
                }
            }
            "JOIN_REQUESTS" => {
                let [] = arity("JOIN_REQUESTS", args)?;
                Request::JoinRequests
            }
            "CONFIRM_JOIN_REQUEST" => {
                let [circle_id] = arity("CONFIRM_JOIN_REQUEST", args)?;
                Request::ConfirmJoinRequest {
                    circle_id: number("circle_id", circle_id)?,
                }
            }
            "DECLINE_JOIN_REQUEST" => {
                let [circle_id] = arity("DECLINE_JOIN_REQUEST", args)?;
                Request::DeclineJoinRequest {
                    circle_id: number("circle_id", circle_id)?,
                }
            }
            "ADD_CIRCLE_MEMBER" => {
                let [circle_id, email] = arity("ADD_CIRCLE_MEMBER", args)?;
                Request::AddCircleMember {
                    circle_id: number("circle_id", circle_id)?,
                    email: email.to_string(),
                }
            }
            "REMOVE_CIRCLE_MEMBER" => {
                let [circle_id, user_id] = arity("REMOVE_CIRCLE_MEMBER", args)?;
                Request::RemoveCircleMember {
                    circle_id: number("circle_id", circle_id)?,
                    user_id: number("user_id", user_id)?,
                }
            }
            "DELETE_CIRCLE" => {
                let [circle_id] = arity("DELETE_CIRCLE", args)?;
                Request::DeleteCircle {
                    circle_id: number("circle_id", circle_id)?,
                }
            }
            "CIRCLE_DATA" => {
                let [] = arity("CIRCLE_DATA", args)?;
                Request::CircleData
            }
            other => return Err(ProtocolError::UnknownTag(other.to_string())),
        };

        Ok(request)
    }

    /// The tag naming this request on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            Request::EmailTaken { .. } => "EMAIL_TAKEN",
            Request::Login { .. } => "LOGIN",
            Request::Register { .. } => "REGISTER",
            Request::Location { .. } => "LOCATION",
            Request::CreateCircle { .. } => "CREATE_CIRCLE",
            Request::JoinRequests => "JOIN_REQUESTS",
            Request::ConfirmJoinRequest { .. } => "CONFIRM_JOIN_REQUEST",
            Request::DeclineJoinRequest { .. } => "DECLINE_JOIN_REQUEST",
            Request::AddCircleMember { .. } => "ADD_CIRCLE_MEMBER",
            Request::RemoveCircleMember { .. } => "REMOVE_CIRCLE_MEMBER",
            Request::DeleteCircle { .. } => "DELETE_CIRCLE",
            Request::CircleData => "CIRCLE_DATA",
        }
    }

    /// Whether the request may be served before the connection logged in.
    pub fn is_anonymous(&self) -> bool {
        matches!(
            self,
            Request::EmailTaken { .. } | Request::Login { .. } | Request::Register { .. }
        )
    }

    /// Serializes the request into a frame payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut fields = vec![self.tag().to_string()];

        match self {
            Request::EmailTaken { email } => fields.push(email.clone()),
            Request::Login { email, secret } => {
                fields.extend([email.clone(), secret.clone()]);
            }
            Request::Register {
                email,
                first_name,
                last_name,
                secret,
            } => {
                fields.extend([
                    email.clone(),
                    first_name.clone(),
                    last_name.clone(),
                    secret.clone(),
                ]);
            }
            Request::Location {
                user_id,
                latitude,
                longitude,
                accuracy,
                time_recorded,
            } => {
                fields.extend([
                    user_id.to_string(),
                    latitude.to_string(),
                    longitude.to_string(),
                    accuracy.to_string(),
                    time_recorded.to_string(),
                ]);
            }
            Request::CreateCircle { name } => fields.push(name.clone()),
            Request::ConfirmJoinRequest { circle_id }
            | Request::DeclineJoinRequest { circle_id }
            | Request::DeleteCircle { circle_id } => fields.push(circle_id.to_string()),
            Request::AddCircleMember { circle_id, email } => {
                fields.extend([circle_id.to_string(), email.clone()]);
            }
            Request::RemoveCircleMember { circle_id, user_id } => {
                fields.extend([circle_id.to_string(), user_id.to_string()]);
            }
            Request::JoinRequests | Request::CircleData => {}
        }

        join(&fields)
    }
}

fn arity<'a, const N: usize>(
    tag: &'static str,
    args: &[&'a str],
) -> Result<[&'a str; N], ProtocolError> {
    <[&str; N]>::try_from(args).map_err(|_| ProtocolError::FieldCount {
        tag,
        expected: N,
        found: args.len(),
    })
}

fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.trim().parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_fields() {
        let request = Request::parse(b"LOCATION\n42\n10.0\n20.0\n5.0\n1700000000").unwrap();

        assert_eq!(
            request,
            Request::Location {
                user_id: 42,
                latitude: 10.0,
                longitude: 20.0,
                accuracy: 5.0,
                time_recorded: 1_700_000_000,
            }
        );
        assert!(!request.is_anonymous());
    }

    #[test]
    fn trailing_delimiter_is_ignored() {
        assert_eq!(Request::parse(b"CIRCLE_DATA\n").unwrap(), Request::CircleData);
    }

    #[test]
    fn unknown_tag_is_reported() {
        assert_eq!(
            Request::parse(b"SELF_DESTRUCT\nnow"),
            Err(ProtocolError::UnknownTag("SELF_DESTRUCT".into()))
        );
    }

    #[test]
    fn wrong_field_count_is_reported() {
        assert_eq!(
            Request::parse(b"LOGIN\nalice@example.com"),
            Err(ProtocolError::FieldCount {
                tag: "LOGIN",
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn non_numeric_id_is_reported() {
        let err = Request::parse(b"DELETE_CIRCLE\nseven").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField {
                field: "circle_id",
                ..
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        assert_eq!(
            Request::parse(&[0x4c, 0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        );
    }

    #[test]
    fn payload_parses_back_to_the_same_request() {
        let request = Request::Register {
            email: "bob@example.com".into(),
            first_name: "Bob".into(),
            last_name: "Builder".into(),
            secret: "hunter2".into(),
        };

        assert_eq!(Request::parse(&request.to_payload()).unwrap(), request);
    }
}
