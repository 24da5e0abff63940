use super::{
    Circle, CircleData, CircleId, Directory, DirectoryError, Location, Member, Membership,
    NewUser, User, UserId,
};
use crate::utils::lock;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use tracing::debug;

/// A [`Directory`] held entirely in memory.
///
/// Identifiers are allocated sequentially from 1. Listings are returned
/// in identifier order.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_id: i64,
    users: BTreeMap<UserId, Account>,
    emails: HashMap<String, UserId>,
    circles: BTreeMap<CircleId, String>,
    memberships: BTreeMap<i64, Entry>,
    locations: BTreeMap<UserId, Location>,
}

struct Account {
    user: User,
    secret: String,
}

struct Entry {
    circle_id: CircleId,
    user_id: UserId,
    confirmed: bool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn entry(&self, circle: CircleId, user: UserId) -> Option<(i64, &Entry)> {
        self.memberships
            .iter()
            .find(|(_, e)| e.circle_id == circle && e.user_id == user)
            .map(|(id, e)| (*id, e))
    }

    fn require_confirmed(&self, circle: CircleId, user: UserId) -> Result<(), DirectoryError> {
        match self.entry(circle, user) {
            Some((_, entry)) if entry.confirmed => Ok(()),
            _ => Err(DirectoryError::NotMember),
        }
    }

    fn member(&self, id: UserId) -> Option<Member> {
        self.users.get(&id).map(|account| Member {
            id,
            first_name: account.user.first_name.clone(),
            last_name: account.user.last_name.clone(),
        })
    }

    fn circle(&self, id: CircleId) -> Option<Circle> {
        self.circles.get(&id).map(|name| Circle {
            id,
            name: name.clone(),
        })
    }

    /// Circles `user` is a confirmed member of.
    fn confirmed_circles(&self, user: UserId) -> BTreeSet<CircleId> {
        self.memberships
            .values()
            .filter(|e| e.user_id == user && e.confirmed)
            .map(|e| e.circle_id)
            .collect()
    }

    fn remove_circle(&mut self, circle: CircleId) {
        self.circles.remove(&circle);
        self.memberships.retain(|_, e| e.circle_id != circle);
    }
}

impl Directory for MemoryDirectory {
    fn email_taken(&self, email: &str) -> Result<bool, DirectoryError> {
        Ok(lock(&self.state).emails.contains_key(email))
    }

    fn login(&self, email: &str, secret: &str) -> Result<User, DirectoryError> {
        let state = lock(&self.state);
        let id = state
            .emails
            .get(email)
            .ok_or(DirectoryError::UnknownEmail)?;

        let account = state
            .users
            .get(id)
            .ok_or_else(|| DirectoryError::Storage(format!("dangling email index for {id}")))?;

        if account.secret != secret {
            return Err(DirectoryError::WrongPassword);
        }

        Ok(account.user.clone())
    }

    fn register(&self, new: NewUser) -> Result<User, DirectoryError> {
        let mut state = lock(&self.state);

        if state.emails.contains_key(&new.email) {
            return Err(DirectoryError::EmailTaken);
        }

        let id = state.next_id();
        let user = User {
            id,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
        };

        state.emails.insert(user.email.clone(), id);
        state.users.insert(
            id,
            Account {
                user: user.clone(),
                secret: new.secret,
            },
        );

        debug!(user = id, "user registered");
        Ok(user)
    }

    fn record_location(&self, location: Location) -> Result<(), DirectoryError> {
        let mut state = lock(&self.state);

        if !state.users.contains_key(&location.user_id) {
            return Err(DirectoryError::UserNotFound);
        }

        state.locations.insert(location.user_id, location);
        Ok(())
    }

    fn create_circle(&self, name: &str, requester: UserId) -> Result<CircleId, DirectoryError> {
        let mut state = lock(&self.state);

        if !state.users.contains_key(&requester) {
            return Err(DirectoryError::UserNotFound);
        }

        let circle = state.next_id();
        state.circles.insert(circle, name.to_string());

        let membership = state.next_id();
        state.memberships.insert(
            membership,
            Entry {
                circle_id: circle,
                user_id: requester,
                confirmed: true,
            },
        );

        Ok(circle)
    }

    fn join_requests(&self, requester: UserId) -> Result<Vec<Circle>, DirectoryError> {
        let state = lock(&self.state);

        let pending: BTreeSet<CircleId> = state
            .memberships
            .values()
            .filter(|e| e.user_id == requester && !e.confirmed)
            .map(|e| e.circle_id)
            .collect();

        Ok(pending.into_iter().filter_map(|id| state.circle(id)).collect())
    }

    fn confirm_join_request(
        &self,
        circle: CircleId,
        requester: UserId,
    ) -> Result<Vec<Member>, DirectoryError> {
        let mut state = lock(&self.state);

        let (id, _) = state
            .entry(circle, requester)
            .ok_or(DirectoryError::NotMember)?;

        if let Some(entry) = state.memberships.get_mut(&id) {
            entry.confirmed = true;
        }

        let others: BTreeSet<UserId> = state
            .memberships
            .values()
            .filter(|e| e.circle_id == circle && e.confirmed && e.user_id != requester)
            .map(|e| e.user_id)
            .collect();

        Ok(others.into_iter().filter_map(|id| state.member(id)).collect())
    }

    fn decline_join_request(
        &self,
        circle: CircleId,
        requester: UserId,
    ) -> Result<(), DirectoryError> {
        let mut state = lock(&self.state);

        let invitation = state
            .entry(circle, requester)
            .filter(|(_, entry)| !entry.confirmed)
            .map(|(id, _)| id);

        match invitation {
            Some(id) => {
                state.memberships.remove(&id);
                Ok(())
            }
            None => Err(DirectoryError::NotMember),
        }
    }

    fn add_circle_member(
        &self,
        circle: CircleId,
        email: &str,
        requester: UserId,
    ) -> Result<(), DirectoryError> {
        let mut state = lock(&self.state);

        state.require_confirmed(circle, requester)?;

        let invitee = *state
            .emails
            .get(email)
            .ok_or(DirectoryError::UserNotFound)?;

        if state.entry(circle, invitee).is_none() {
            let id = state.next_id();
            state.memberships.insert(
                id,
                Entry {
                    circle_id: circle,
                    user_id: invitee,
                    confirmed: false,
                },
            );
        }

        Ok(())
    }

    fn remove_circle_member(
        &self,
        circle: CircleId,
        member: UserId,
        requester: UserId,
    ) -> Result<(), DirectoryError> {
        let mut state = lock(&self.state);

        state.require_confirmed(circle, requester)?;

        let remaining = state
            .memberships
            .values()
            .filter(|e| e.circle_id == circle)
            .count();

        if remaining == 1 {
            state.remove_circle(circle);
            debug!(circle, "last member left, circle removed");
            return Ok(());
        }

        let (id, _) = state
            .entry(circle, member)
            .ok_or(DirectoryError::UserNotFound)?;
        state.memberships.remove(&id);

        Ok(())
    }

    fn delete_circle(&self, circle: CircleId, requester: UserId) -> Result<(), DirectoryError> {
        let mut state = lock(&self.state);

        state.require_confirmed(circle, requester)?;
        state.remove_circle(circle);

        Ok(())
    }

    fn circle_data(&self, requester: UserId) -> Result<CircleData, DirectoryError> {
        let state = lock(&self.state);
        let circles = state.confirmed_circles(requester);

        let memberships: Vec<Membership> = state
            .memberships
            .iter()
            .filter(|(_, e)| circles.contains(&e.circle_id))
            .map(|(id, e)| Membership {
                id: *id,
                circle_id: e.circle_id,
                user_id: e.user_id,
            })
            .collect();

        let others: BTreeSet<UserId> = memberships
            .iter()
            .map(|m| m.user_id)
            .filter(|id| *id != requester)
            .collect();

        let invitations: BTreeSet<CircleId> = state
            .memberships
            .values()
            .filter(|e| e.user_id == requester && !e.confirmed)
            .map(|e| e.circle_id)
            .collect();

        Ok(CircleData {
            circles: circles.iter().filter_map(|id| state.circle(*id)).collect(),
            users: others.iter().filter_map(|id| state.member(*id)).collect(),
            invitations: invitations
                .into_iter()
                .filter_map(|id| state.circle(id))
                .collect(),
            locations: others
                .iter()
                .filter_map(|id| state.locations.get(id).cloned())
                .collect(),
            memberships,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(directory: &MemoryDirectory, email: &str, first: &str) -> User {
        directory
            .register(NewUser {
                email: email.into(),
                first_name: first.into(),
                last_name: "Tester".into(),
                secret: format!("{first}-secret"),
            })
            .unwrap()
    }

    #[test]
    fn login_distinguishes_email_and_password_errors() {
        let directory = MemoryDirectory::new();
        let alice = register(&directory, "alice@example.com", "Alice");

        assert_eq!(
            directory.login("alice@example.com", "Alice-secret").unwrap(),
            alice
        );
        assert_eq!(
            directory.login("alice@example.com", "nope"),
            Err(DirectoryError::WrongPassword)
        );
        assert_eq!(
            directory.login("bob@example.com", "Alice-secret"),
            Err(DirectoryError::UnknownEmail)
        );
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let directory = MemoryDirectory::new();
        register(&directory, "alice@example.com", "Alice");

        assert!(directory.email_taken("alice@example.com").unwrap());
        assert_eq!(
            directory.register(NewUser {
                email: "alice@example.com".into(),
                first_name: "Other".into(),
                last_name: "Alice".into(),
                secret: "x".into(),
            }),
            Err(DirectoryError::EmailTaken)
        );
    }

    #[test]
    fn invitation_flow_exposes_members_and_locations() {
        let directory = MemoryDirectory::new();
        let alice = register(&directory, "alice@example.com", "Alice");
        let bob = register(&directory, "bob@example.com", "Bob");

        let circle = directory.create_circle("hikers", alice.id).unwrap();
        directory
            .add_circle_member(circle, "bob@example.com", alice.id)
            .unwrap();

        let invitations = directory.join_requests(bob.id).unwrap();
        assert_eq!(invitations.len(), 1);
        assert_eq!(invitations[0].name, "hikers");

        let members = directory.confirm_join_request(circle, bob.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, alice.id);
        assert!(directory.join_requests(bob.id).unwrap().is_empty());

        directory
            .record_location(Location {
                user_id: alice.id,
                latitude: 60.17,
                longitude: 24.94,
                accuracy: 5.0,
                time_recorded: 1_700_000_000,
            })
            .unwrap();

        let data = directory.circle_data(bob.id).unwrap();
        assert_eq!(data.circles.len(), 1);
        assert_eq!(data.memberships.len(), 2);
        assert_eq!(data.users.len(), 1);
        assert_eq!(data.locations.len(), 1);
        assert_eq!(data.locations[0].user_id, alice.id);
        assert!(data.invitations.is_empty());
    }

    #[test]
    fn outsiders_cannot_manage_a_circle() {
        let directory = MemoryDirectory::new();
        let alice = register(&directory, "alice@example.com", "Alice");
        let mallory = register(&directory, "mallory@example.com", "Mallory");
        let circle = directory.create_circle("family", alice.id).unwrap();

        assert_eq!(
            directory.add_circle_member(circle, "mallory@example.com", mallory.id),
            Err(DirectoryError::NotMember)
        );
        assert_eq!(
            directory.delete_circle(circle, mallory.id),
            Err(DirectoryError::NotMember)
        );
        assert_eq!(
            directory.add_circle_member(circle, "nobody@example.com", alice.id),
            Err(DirectoryError::UserNotFound)
        );
    }

    #[test]
    fn removing_the_last_member_deletes_the_circle() {
        let directory = MemoryDirectory::new();
        let alice = register(&directory, "alice@example.com", "Alice");
        let circle = directory.create_circle("solo", alice.id).unwrap();

        directory
            .remove_circle_member(circle, alice.id, alice.id)
            .unwrap();

        assert!(directory.circle_data(alice.id).unwrap().circles.is_empty());
        assert_eq!(
            directory.delete_circle(circle, alice.id),
            Err(DirectoryError::NotMember)
        );
    }

    #[test]
    fn declining_removes_the_invitation() {
        let directory = MemoryDirectory::new();
        let alice = register(&directory, "alice@example.com", "Alice");
        let bob = register(&directory, "bob@example.com", "Bob");
        let circle = directory.create_circle("hikers", alice.id).unwrap();

        directory
            .add_circle_member(circle, "bob@example.com", alice.id)
            .unwrap();
        directory.decline_join_request(circle, bob.id).unwrap();

        assert!(directory.join_requests(bob.id).unwrap().is_empty());
        assert_eq!(
            directory.decline_join_request(circle, bob.id),
            Err(DirectoryError::NotMember)
        );
    }
}
