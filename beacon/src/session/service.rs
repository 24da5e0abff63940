//! Request service: maps one [`Request`] onto [`Directory`] calls and
//! turns the outcome into a [`Reply`].

use crate::directory::{Directory, DirectoryError, Location, NewUser, UserId};
use crate::protocol::{Reply, ReplyCode, Request};

use std::fmt::Display;

use tracing::{debug, warn};

/// Terminates every record of a `CIRCLE_DATA` group, and the group itself.
const RECORD_END: char = ';';

/// Separates the fields of one record.
const FIELD_SEP: char = ',';

/// Serves `request` on behalf of the connection whose login state is
/// `identity`.
///
/// A successful `LOGIN` or `REGISTER` sets `identity`; every other request
/// except `EMAIL_TAKEN` requires it.
pub fn serve<D: Directory + ?Sized>(
    directory: &D,
    identity: &mut Option<UserId>,
    request: Request,
) -> Reply {
    match request {
        Request::EmailTaken { email } => match directory.email_taken(&email) {
            Ok(taken) => Reply::with_parts(ReplyCode::EmailTaken, [if taken { "1" } else { "0" }]),
            Err(e) => refuse(e, ReplyCode::UnknownError),
        },

        Request::Login { email, secret } => match directory.login(&email, &secret) {
            Ok(user) => {
                *identity = Some(user.id);
                debug!(user = user.id, "logged in");
                Reply::with_parts(
                    ReplyCode::LoginSuccessful,
                    [user.id.to_string(), user.first_name, user.last_name],
                )
            }
            Err(e) => refuse(e, ReplyCode::UnknownError),
        },

        Request::Register {
            email,
            first_name,
            last_name,
            secret,
        } => {
            let new = NewUser {
                email,
                first_name,
                last_name,
                secret,
            };

            match directory.register(new) {
                Ok(user) => {
                    *identity = Some(user.id);
                    Reply::with_parts(
                        ReplyCode::RegistrationSuccessful,
                        [
                            user.id.to_string(),
                            user.first_name,
                            user.last_name,
                            user.email,
                        ],
                    )
                }
                Err(e) => refuse(e, ReplyCode::UnknownError),
            }
        }

        request => match *identity {
            Some(user) => serve_member(directory, user, request),
            None => {
                debug!(tag = request.tag(), "request before login");
                Reply::new(ReplyCode::NotLoggedIn)
            }
        },
    }
}

/// Requests scoped to the logged-in `user`.
fn serve_member<D: Directory + ?Sized>(directory: &D, user: UserId, request: Request) -> Reply {
    match request {
        Request::Location {
            user_id,
            latitude,
            longitude,
            accuracy,
            time_recorded,
        } => {
            if user_id != user {
                return Reply::new(ReplyCode::WrongUserId);
            }

            let location = Location {
                user_id,
                latitude,
                longitude,
                accuracy,
                time_recorded,
            };

            match directory.record_location(location) {
                Ok(()) => Reply::new(ReplyCode::LocationTransferSuccess),
                Err(e) => refuse(e, ReplyCode::NotPartOfCircle),
            }
        }

        Request::CreateCircle { name } => match directory.create_circle(&name, user) {
            Ok(id) => Reply::with_parts(ReplyCode::CircleCreateSuccessful, [id.to_string()]),
            Err(e) => refuse(e, ReplyCode::NotPartOfCircle),
        },

        Request::JoinRequests => match directory.join_requests(user) {
            Ok(circles) => Reply::with_parts(
                ReplyCode::JoinRequestSuccessful,
                circles.iter().map(|c| record(&[&c.id, &c.name])),
            ),
            Err(e) => refuse(e, ReplyCode::JoinRequestError),
        },

        Request::ConfirmJoinRequest { circle_id } => {
            match directory.confirm_join_request(circle_id, user) {
                Ok(members) => Reply::with_parts(
                    ReplyCode::JoinRequestConfirmedSuccessfully,
                    members
                        .iter()
                        .map(|m| record(&[&m.id, &m.first_name, &m.last_name])),
                ),
                Err(e) => refuse(e, ReplyCode::JoinRequestError),
            }
        }

        Request::DeclineJoinRequest { circle_id } => {
            match directory.decline_join_request(circle_id, user) {
                Ok(()) => Reply::new(ReplyCode::JoinRequestDeclinedSuccessfully),
                Err(e) => refuse(e, ReplyCode::JoinRequestError),
            }
        }

        Request::AddCircleMember { circle_id, email } => {
            match directory.add_circle_member(circle_id, &email, user) {
                Ok(()) => Reply::new(ReplyCode::AddFriendSuccessful),
                Err(e) => refuse(e, ReplyCode::NotPartOfCircle),
            }
        }

        Request::RemoveCircleMember { circle_id, user_id } => {
            match directory.remove_circle_member(circle_id, user_id, user) {
                Ok(()) => Reply::new(ReplyCode::RemoveFriendSuccessful),
                Err(e) => refuse(e, ReplyCode::NotPartOfCircle),
            }
        }

        Request::DeleteCircle { circle_id } => match directory.delete_circle(circle_id, user) {
            Ok(()) => Reply::new(ReplyCode::CircleDeleteSuccessful),
            Err(e) => refuse(e, ReplyCode::NotPartOfCircle),
        },

        Request::CircleData => match directory.circle_data(user) {
            Ok(data) => {
                let circles = group(data.circles.iter().map(|c| record(&[&c.id, &c.name])));
                let memberships = group(
                    data.memberships
                        .iter()
                        .map(|m| record(&[&m.id, &m.circle_id, &m.user_id])),
                );
                let users = group(
                    data.users
                        .iter()
                        .map(|u| record(&[&u.id, &u.first_name, &u.last_name])),
                );
                let invitations =
                    group(data.invitations.iter().map(|c| record(&[&c.id, &c.name])));
                let locations = group(data.locations.iter().map(|l| {
                    record(&[
                        &l.user_id,
                        &l.latitude,
                        &l.longitude,
                        &l.accuracy,
                        &l.time_recorded,
                    ])
                }));

                Reply::with_parts(
                    ReplyCode::DataRequestSuccessful,
                    [circles, memberships, users, invitations, locations],
                )
            }
            Err(DirectoryError::Storage(e)) => {
                warn!(error = %e, "circle data unavailable");
                Reply::new(ReplyCode::DataRequestError)
            }
            Err(e) => refuse(e, ReplyCode::DataRequestError),
        },

        // Served by `serve` before login is checked.
        Request::EmailTaken { .. } | Request::Login { .. } | Request::Register { .. } => {
            Reply::new(ReplyCode::UnknownError)
        }
    }
}

/// Reply for a failed directory call. `not_member` is the code this
/// request uses when the user is not part of the circle.
fn refuse(error: DirectoryError, not_member: ReplyCode) -> Reply {
    let code = match error {
        DirectoryError::EmailTaken => ReplyCode::EmailTaken,
        DirectoryError::UnknownEmail => ReplyCode::CredentialErrorEmail,
        DirectoryError::WrongPassword => ReplyCode::CredentialErrorPassword,
        DirectoryError::NotMember => not_member,
        DirectoryError::UserNotFound => ReplyCode::FriendNotFound,
        DirectoryError::Storage(e) => {
            warn!(error = %e, "directory failure");
            ReplyCode::UnknownError
        }
    };

    Reply::new(code)
}

fn record(fields: &[&dyn Display]) -> String {
    let mut out = String::new();

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEP);
        }
        out.push_str(&field.to_string());
    }

    out
}

/// Terminates each record and closes the group, so an empty group is `;`.
fn group(records: impl Iterator<Item = String>) -> String {
    let mut out = String::new();

    for record in records {
        out.push_str(&record);
        out.push(RECORD_END);
    }

    out.push(RECORD_END);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;

    fn register(directory: &MemoryDirectory, email: &str) -> (Option<UserId>, Reply) {
        let mut identity = None;
        let reply = serve(
            directory,
            &mut identity,
            Request::Register {
                email: email.into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                secret: "s3cret".into(),
            },
        );
        (identity, reply)
    }

    #[test]
    fn identity_scoped_requests_need_login() {
        let directory = MemoryDirectory::new();
        let mut identity = None;

        for request in [
            Request::CircleData,
            Request::JoinRequests,
            Request::CreateCircle { name: "x".into() },
        ] {
            let reply = serve(&directory, &mut identity, request);
            assert_eq!(reply.code, ReplyCode::NotLoggedIn);
        }
    }

    #[test]
    fn login_is_sticky_and_checks_location_owner() {
        let directory = MemoryDirectory::new();
        let (_, registered) = register(&directory, "ada@example.com");
        assert_eq!(registered.code, ReplyCode::RegistrationSuccessful);
        assert_eq!(registered.parts, ["1", "Ada", "Lovelace", "ada@example.com"]);

        let mut identity = None;
        let reply = serve(
            &directory,
            &mut identity,
            Request::Login {
                email: "ada@example.com".into(),
                secret: "s3cret".into(),
            },
        );
        assert_eq!(reply.code, ReplyCode::LoginSuccessful);
        assert_eq!(reply.parts, ["1", "Ada", "Lovelace"]);
        assert_eq!(identity, Some(1));

        let location = |user_id| Request::Location {
            user_id,
            latitude: 1.5,
            longitude: 2.5,
            accuracy: 3.0,
            time_recorded: 4,
        };

        let own = serve(&directory, &mut identity, location(1));
        assert_eq!(own.code, ReplyCode::LocationTransferSuccess);

        let other = serve(&directory, &mut identity, location(2));
        assert_eq!(other.code, ReplyCode::WrongUserId);
    }

    #[test]
    fn credential_errors_are_distinguished() {
        let directory = MemoryDirectory::new();
        register(&directory, "ada@example.com");
        let mut identity = None;

        let wrong_email = serve(
            &directory,
            &mut identity,
            Request::Login {
                email: "bob@example.com".into(),
                secret: "s3cret".into(),
            },
        );
        assert_eq!(wrong_email.code, ReplyCode::CredentialErrorEmail);

        let wrong_secret = serve(
            &directory,
            &mut identity,
            Request::Login {
                email: "ada@example.com".into(),
                secret: "guess".into(),
            },
        );
        assert_eq!(wrong_secret.code, ReplyCode::CredentialErrorPassword);
        assert_eq!(identity, None);

        let (_, again) = register(&directory, "ada@example.com");
        assert_eq!(again.code, ReplyCode::EmailTaken);

        let taken = serve(
            &directory,
            &mut identity,
            Request::EmailTaken {
                email: "ada@example.com".into(),
            },
        );
        assert_eq!(taken.parts, ["1"]);
    }

    #[test]
    fn circle_data_groups_are_terminated() {
        let directory = MemoryDirectory::new();
        let (mut identity, _) = register(&directory, "ada@example.com");

        let empty = serve(&directory, &mut identity, Request::CircleData);
        assert_eq!(empty.code, ReplyCode::DataRequestSuccessful);
        assert_eq!(empty.parts, [";", ";", ";", ";", ";"]);

        let created = serve(
            &directory,
            &mut identity,
            Request::CreateCircle {
                name: "family".into(),
            },
        );
        let circle = created.parts[0].clone();

        let data = serve(&directory, &mut identity, Request::CircleData);
        assert_eq!(data.parts[0], format!("{circle},family;;"));
        assert_eq!(data.parts[2], ";");
    }

    #[test]
    fn membership_errors_use_the_request_code() {
        let directory = MemoryDirectory::new();
        let (mut identity, _) = register(&directory, "ada@example.com");

        let confirm = serve(
            &directory,
            &mut identity,
            Request::ConfirmJoinRequest { circle_id: 42 },
        );
        assert_eq!(confirm.code, ReplyCode::JoinRequestError);

        let delete = serve(
            &directory,
            &mut identity,
            Request::DeleteCircle { circle_id: 42 },
        );
        assert_eq!(delete.code, ReplyCode::NotPartOfCircle);
    }
}
