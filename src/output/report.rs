//! Serialized shape of an emitted session.

use chrono::SecondsFormat;
use serde::Serialize;

use crate::session::{Role, SessionRecord, SessionState, hassh, hassh_algorithms};
use crate::ssh::KexInitRecord;

#[derive(Debug, Serialize)]
pub struct SessionReport<'a> {
    pub timestamp: Option<String>,
    pub client_ip: Option<String>,
    pub client_port: Option<String>,
    pub server_ip: Option<String>,
    pub server_port: Option<String>,
    pub client: SideReport<'a>,
    pub server: SideReport<'a>,
}

#[derive(Debug, Serialize)]
pub struct SideReport<'a> {
    pub banner: Option<&'a str>,
    pub kexinit: Option<KexInitReport<'a>>,
    pub hassh: Option<String>,
    pub hassh_algorithms: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KexInitReport<'a> {
    pub cookie: String,
    pub kex_algorithms: &'a str,
    pub server_host_key_algorithms: &'a str,
    pub encryption_algorithms_client_to_server: &'a str,
    pub encryption_algorithms_server_to_client: &'a str,
    pub mac_algorithms_client_to_server: &'a str,
    pub mac_algorithms_server_to_client: &'a str,
    pub compression_algorithms_client_to_server: &'a str,
    pub compression_algorithms_server_to_client: &'a str,
    pub languages_client_to_server: &'a str,
    pub languages_server_to_client: &'a str,
    pub first_kex_packet_follows: bool,
}

impl<'a> SessionReport<'a> {
    pub fn new(record: &'a SessionRecord) -> Self {
        let identity = record.identity();
        SessionReport {
            timestamp: identity.map(|id| id.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            client_ip: identity.map(|id| id.client.ip().to_string()),
            client_port: identity.map(|id| id.client.port().to_string()),
            server_ip: identity.map(|id| id.server.ip().to_string()),
            server_port: identity.map(|id| id.server.port().to_string()),
            client: SideReport::new(record.client(), Role::Client),
            server: SideReport::new(record.server(), Role::Server),
        }
    }
}

impl<'a> SideReport<'a> {
    fn new(side: &'a SessionState, role: Role) -> Self {
        let kex = side.kexinit();
        SideReport {
            banner: side.banner().map(|b| b.text()),
            kexinit: kex.map(KexInitReport::new),
            hassh: kex.map(|k| hassh(k, role)),
            hassh_algorithms: kex.map(|k| hassh_algorithms(k, role)),
        }
    }
}

impl<'a> KexInitReport<'a> {
    fn new(kex: &'a KexInitRecord) -> Self {
        KexInitReport {
            cookie: hex(&kex.cookie),
            kex_algorithms: &kex.kex_algorithms,
            server_host_key_algorithms: &kex.server_host_key_algorithms,
            encryption_algorithms_client_to_server: &kex.encryption_algorithms_client_to_server,
            encryption_algorithms_server_to_client: &kex.encryption_algorithms_server_to_client,
            mac_algorithms_client_to_server: &kex.mac_algorithms_client_to_server,
            mac_algorithms_server_to_client: &kex.mac_algorithms_server_to_client,
            compression_algorithms_client_to_server: &kex.compression_algorithms_client_to_server,
            compression_algorithms_server_to_client: &kex.compression_algorithms_server_to_client,
            languages_client_to_server: &kex.languages_client_to_server,
            languages_server_to_client: &kex.languages_server_to_client,
            first_kex_packet_follows: kex.first_kex_packet_follows,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
