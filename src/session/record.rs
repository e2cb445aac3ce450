use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use super::fingerprint::{self, Role};
use super::{Progress, SessionState};

/// Who talked to whom, and when the client's first bytes were seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub client: SocketAddr,
    pub server: SocketAddr,
    pub timestamp: DateTime<Utc>,
}

/// Everything learned about one SSH connection's preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    identity: Option<ConnectionIdentity>,
    client: SessionState,
    server: SessionState,
}

impl SessionRecord {
    pub fn new(skip_banner: bool) -> Self {
        let side = || {
            if skip_banner {
                SessionState::with_banner_skipped()
            } else {
                SessionState::new()
            }
        };
        SessionRecord {
            identity: None,
            client: side(),
            server: side(),
        }
    }

    pub fn identity(&self) -> Option<&ConnectionIdentity> {
        self.identity.as_ref()
    }

    /// Record the connection identity. Only the first call has any effect.
    pub fn set_identity(&mut self, identity: ConnectionIdentity) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(identity);
        true
    }

    pub fn client(&self) -> &SessionState {
        &self.client
    }

    pub fn server(&self) -> &SessionState {
        &self.server
    }

    pub fn side(&self, role: Role) -> &SessionState {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    /// Feed bytes sent by `role` into that side's state machine.
    pub fn feed(&mut self, role: Role, data: &[u8]) -> Progress {
        match role {
            Role::Client => self.client.feed(data),
            Role::Server => self.server.feed(data),
        }
    }

    pub fn hassh(&self) -> Option<String> {
        self.fingerprint(Role::Client)
    }

    pub fn hassh_server(&self) -> Option<String> {
        self.fingerprint(Role::Server)
    }

    pub fn fingerprint(&self, role: Role) -> Option<String> {
        self.side(role)
            .kexinit()
            .map(|kex| fingerprint::hassh(kex, role))
    }

    /// True once either side produced anything worth reporting.
    pub fn has_artifacts(&self) -> bool {
        [&self.client, &self.server]
            .iter()
            .any(|side| side.banner().is_some() || side.kexinit().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DirectionState;
    use crate::ssh::kexinit::tests::openssh_client_kexinit;

    fn identity(port: u16) -> ConnectionIdentity {
        ConnectionIdentity {
            client: SocketAddr::from(([10, 0, 0, 1], port)),
            server: SocketAddr::from(([10, 0, 0, 2], 22)),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn identity_is_set_once() {
        let mut record = SessionRecord::new(false);
        assert!(record.identity().is_none());
        assert!(record.set_identity(identity(40000)));
        assert!(!record.set_identity(identity(50000)));
        assert_eq!(record.identity().unwrap().client.port(), 40000);
    }

    #[test]
    fn sides_are_independent() {
        let mut record = SessionRecord::new(false);
        record.feed(Role::Server, b"SSH-2.0-OpenSSH_9.6\r\n");
        assert!(record.server().banner().is_some());
        assert!(record.client().banner().is_none());
        assert_eq!(record.client().state(), DirectionState::AwaitingBanner);
        assert!(record.has_artifacts());
    }

    #[test]
    fn fingerprints_follow_kexinit() {
        let mut record = SessionRecord::new(true);
        assert_eq!(record.hassh(), None);
        assert!(!record.has_artifacts());

        record.feed(Role::Client, &openssh_client_kexinit().to_packet(8));
        let expected = fingerprint::hassh(&openssh_client_kexinit(), Role::Client);
        assert_eq!(record.hassh(), Some(expected));
        assert_eq!(record.hassh_server(), None);
        assert!(record.has_artifacts());
    }

    #[test]
    fn skip_banner_applies_to_both_sides() {
        let record = SessionRecord::new(true);
        assert_eq!(record.client().state(), DirectionState::BannerComplete);
        assert_eq!(record.server().state(), DirectionState::BannerComplete);
    }
}
