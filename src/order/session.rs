//! Order-side session table (§3 "Session table") and `validate_login`
//! (§4.7).

use std::collections::HashMap;

/// Outcome of validating one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The session key matched (or the account was unknown under permissive
    /// policy, in which case it is now remembered).
    Accepted,
    /// The account is unknown (strict policy) or the key did not match.
    Rejected,
}

impl LoginOutcome {
    /// The wire `result` code: `0` on success, non-zero otherwise.
    #[must_use]
    pub const fn result_code(self) -> i32 {
        match self {
            Self::Accepted => 0,
            Self::Rejected => 1,
        }
    }
}

/// `account → session_key` map, populated on successful login and consulted
/// on every subsequent login for the same account.
///
/// Login policy defaults to strict: an account absent from the table is
/// rejected. `ORDER_PERMISSIVE_LOGIN` switches to permissive, under which an
/// unknown account is approved on first sight and its key remembered.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<u32, String>,
    permissive: bool,
}

impl SessionTable {
    /// Create an empty session table under the given login policy.
    #[must_use]
    pub fn new(permissive: bool) -> Self {
        Self {
            sessions: HashMap::new(),
            permissive,
        }
    }

    /// Switch the login policy without disturbing already-established
    /// sessions. Applied on `SIGUSR1` reload.
    pub fn set_permissive(&mut self, permissive: bool) {
        self.permissive = permissive;
    }

    /// Validate one login attempt against the current table snapshot.
    ///
    /// Deterministic in `(self, account, session_key)`: two identical calls
    /// against the same snapshot return the same outcome (Testable
    /// Property 6). Note that a permissive-mode first-sight acceptance
    /// mutates the snapshot, so a *repeated* call with a *different* key
    /// afterwards is evaluated against the newly learned session, not the
    /// original empty one.
    pub fn validate(&mut self, account: u32, session_key: &str) -> LoginOutcome {
        match self.sessions.get(&account) {
            Some(known) if known == session_key => LoginOutcome::Accepted,
            Some(_) => LoginOutcome::Rejected,
            None if self.permissive => {
                self.sessions.insert(account, session_key.to_owned());
                LoginOutcome::Accepted
            }
            None => LoginOutcome::Rejected,
        }
    }

    /// Directly install a session, bypassing validation. Used by tests and
    /// by out-of-band account provisioning (out of scope here per §1).
    pub fn seed(&mut self, account: u32, session_key: impl Into<String>) {
        self.sessions.insert(account, session_key.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_policy_rejects_an_unknown_account() {
        let mut table = SessionTable::new(false);
        assert_eq!(table.validate(10_000, "k"), LoginOutcome::Rejected);
    }

    #[test]
    fn strict_policy_accepts_a_seeded_account_with_the_matching_key() {
        let mut table = SessionTable::new(false);
        table.seed(10_000, "k");
        assert_eq!(table.validate(10_000, "k"), LoginOutcome::Accepted);
        assert_eq!(table.validate(10_000, "wrong"), LoginOutcome::Rejected);
    }

    #[test]
    fn permissive_policy_approves_an_unknown_account_on_first_sight() {
        let mut table = SessionTable::new(true);
        assert_eq!(table.validate(10_000, "k"), LoginOutcome::Accepted);
        assert_eq!(table.validate(10_000, "k"), LoginOutcome::Accepted);
        assert_eq!(table.validate(10_000, "other"), LoginOutcome::Rejected);
    }

    #[test]
    fn validation_is_deterministic_for_repeated_identical_requests() {
        let mut table = SessionTable::new(false);
        table.seed(10_000, "k");
        let first = table.validate(10_000, "k");
        let second = table.validate(10_000, "k");
        assert_eq!(first, second);
    }
}
