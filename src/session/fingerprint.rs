use std::fmt;

use crate::ssh::KexInitRecord;

/// Which endpoint sent a KEXINIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// The `;`-joined algorithm string a HASSH is computed over.
///
/// A client fingerprints its client-to-server choices, a server its
/// server-to-client ones. Key exchange goes first either way.
pub fn hassh_algorithms(kex: &KexInitRecord, role: Role) -> String {
    let (enc, mac, comp) = match role {
        Role::Client => (
            &kex.encryption_algorithms_client_to_server,
            &kex.mac_algorithms_client_to_server,
            &kex.compression_algorithms_client_to_server,
        ),
        Role::Server => (
            &kex.encryption_algorithms_server_to_client,
            &kex.mac_algorithms_server_to_client,
            &kex.compression_algorithms_server_to_client,
        ),
    };
    format!("{};{};{};{}", kex.kex_algorithms, enc, mac, comp)
}

/// HASSH (client) or hasshServer (server) as 32 lowercase hex digits.
pub fn hassh(kex: &KexInitRecord, role: Role) -> String {
    md5_hex(&hassh_algorithms(kex, role))
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::kexinit::tests::openssh_client_kexinit;

    fn asymmetric() -> KexInitRecord {
        let mut kex = openssh_client_kexinit();
        kex.kex_algorithms = "curve25519-sha256".into();
        kex.encryption_algorithms_client_to_server = "aes128-ctr".into();
        kex.encryption_algorithms_server_to_client = "aes256-ctr".into();
        kex.mac_algorithms_client_to_server = "hmac-sha2-256".into();
        kex.mac_algorithms_server_to_client = "hmac-sha1".into();
        kex.compression_algorithms_client_to_server = "none".into();
        kex.compression_algorithms_server_to_client = "zlib".into();
        kex
    }

    #[test]
    fn digest_format() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn client_uses_client_to_server_lists() {
        assert_eq!(
            hassh_algorithms(&asymmetric(), Role::Client),
            "curve25519-sha256;aes128-ctr;hmac-sha2-256;none"
        );
    }

    #[test]
    fn server_uses_server_to_client_lists() {
        assert_eq!(
            hassh_algorithms(&asymmetric(), Role::Server),
            "curve25519-sha256;aes256-ctr;hmac-sha1;zlib"
        );
    }

    #[test]
    fn hassh_is_md5_of_algorithms() {
        let kex = asymmetric();
        for role in [Role::Client, Role::Server] {
            let digest = hassh(&kex, role);
            assert_eq!(digest, md5_hex(&hassh_algorithms(&kex, role)));
            assert_eq!(digest.len(), 32);
            assert!(
                digest
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            );
        }
        assert_ne!(hassh(&kex, Role::Client), hassh(&kex, Role::Server));
    }

    #[test]
    fn host_key_and_language_lists_do_not_matter() {
        let base = openssh_client_kexinit();
        let mut other = base.clone();
        other.server_host_key_algorithms = "ssh-rsa".into();
        other.languages_client_to_server = "en-US".into();
        other.cookie = [0xee; 16];
        assert_eq!(hassh(&base, Role::Client), hassh(&other, Role::Client));
    }

    #[test]
    fn empty_lists_keep_separators() {
        let mut kex = openssh_client_kexinit();
        kex.kex_algorithms.clear();
        kex.encryption_algorithms_client_to_server.clear();
        kex.mac_algorithms_client_to_server.clear();
        kex.compression_algorithms_client_to_server.clear();
        assert_eq!(hassh_algorithms(&kex, Role::Client), ";;;");
    }
}
