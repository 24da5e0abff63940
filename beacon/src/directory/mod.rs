//! Data-access boundary.
//!
//! The session layer talks to storage only through the [`Directory`]
//! trait. Implementations own users, circles (groups of users who share
//! their locations), memberships and the last known location of each
//! user. [`MemoryDirectory`] keeps everything in process memory.

mod memory;

pub use memory::MemoryDirectory;

use thiserror::Error;

pub type UserId = i64;
pub type CircleId = i64;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Registration data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub secret: String,
}

/// Last reported position of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub user_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub time_recorded: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circle {
    pub id: CircleId,
    pub name: String,
}

/// Public view of another user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

/// One user's membership of one circle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub id: i64,
    pub circle_id: CircleId,
    pub user_id: UserId,
}

/// Everything a user can see through the circles they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircleData {
    /// Circles the user is a confirmed member of.
    pub circles: Vec<Circle>,

    /// Memberships of those circles, confirmed or not.
    pub memberships: Vec<Membership>,

    /// The other users of those circles.
    pub users: Vec<Member>,

    /// Circles the user has been invited to but not confirmed.
    pub invitations: Vec<Circle>,

    /// Last locations of the other users of those circles.
    pub locations: Vec<Location>,
}

/// Failures of a [`Directory`] operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("email address already registered")]
    EmailTaken,

    #[error("no user with this email address")]
    UnknownEmail,

    #[error("wrong password")]
    WrongPassword,

    #[error("user is not a member of the circle")]
    NotMember,

    #[error("user not found")]
    UserNotFound,

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Storage operations the request service relies on.
///
/// `requester` is always the authenticated user of the connection.
pub trait Directory: Send + Sync + 'static {
    fn email_taken(&self, email: &str) -> Result<bool, DirectoryError>;

    /// Checks `secret` against the stored credentials of `email`.
    fn login(&self, email: &str, secret: &str) -> Result<User, DirectoryError>;

    fn register(&self, user: NewUser) -> Result<User, DirectoryError>;

    /// Replaces the stored location of `location.user_id`.
    fn record_location(&self, location: Location) -> Result<(), DirectoryError>;

    /// Creates a circle with `requester` as its first confirmed member.
    fn create_circle(&self, name: &str, requester: UserId) -> Result<CircleId, DirectoryError>;

    /// Circles `requester` has been invited to.
    fn join_requests(&self, requester: UserId) -> Result<Vec<Circle>, DirectoryError>;

    /// Accepts an invitation and returns the other confirmed members.
    fn confirm_join_request(
        &self,
        circle: CircleId,
        requester: UserId,
    ) -> Result<Vec<Member>, DirectoryError>;

    fn decline_join_request(&self, circle: CircleId, requester: UserId)
    -> Result<(), DirectoryError>;

    /// Invites the user registered under `email` into `circle`.
    fn add_circle_member(
        &self,
        circle: CircleId,
        email: &str,
        requester: UserId,
    ) -> Result<(), DirectoryError>;

    /// Removes `member` from `circle`. Removing the last member deletes
    /// the circle.
    fn remove_circle_member(
        &self,
        circle: CircleId,
        member: UserId,
        requester: UserId,
    ) -> Result<(), DirectoryError>;

    fn delete_circle(&self, circle: CircleId, requester: UserId) -> Result<(), DirectoryError>;

    fn circle_data(&self, requester: UserId) -> Result<CircleData, DirectoryError>;
}
