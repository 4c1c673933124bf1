//! Open TCP and UDP sockets with their owning process.

use crate::collector::traits::Collector;
use crate::collector::{gather_vecs, info_vec};
use crate::error::Result;
use procfs::process::{all_processes, FDTarget};
use procfs::ProcResult;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const SUBSYSTEM: &str = "net";

/// One row of a kernel socket table.
#[derive(Debug, Clone, PartialEq)]
struct Connection {
    protocol: &'static str,
    uid: u32,
    inode: u64,
    local: SocketAddr,
    remote: SocketAddr,
    state: String,
}

/// Process holding a socket open.
#[derive(Debug, Clone, PartialEq)]
struct Owner {
    pid: i32,
    cmd: String,
}

/// Reports every socket in the kernel TCP and UDP tables as an info series.
///
/// Sockets whose owner cannot be resolved, because the process belongs to
/// another user or exited meanwhile, are reported with pid 0 and no command.
pub struct ConnectionCollector {
    update_lock: Mutex<()>,
    connection: GaugeVec,
}

impl ConnectionCollector {
    pub fn new(namespace: &str) -> Result<Self> {
        Ok(Self {
            update_lock: Mutex::new(()),
            connection: info_vec(
                namespace,
                SUBSYSTEM,
                "port_conntection",
                "Open TCP and UDP connections",
                &[
                    "uid",
                    "pid",
                    "cmd",
                    "protocol",
                    "ip",
                    "port",
                    "remote_ip",
                    "remote_port",
                    "state",
                ],
            )?,
        })
    }
}

impl Collector for ConnectionCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }

    fn update(&self) -> Result<Vec<MetricFamily>> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.connection.reset();

        let owners = socket_owners();
        for connection in read_connections() {
            let labels = connection_labels(&connection, owners.get(&connection.inode));
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            self.connection.with_label_values(&labels).set(1.0);
        }

        Ok(gather_vecs(&[&self.connection]))
    }
}

/// Kernel state name, e.g. `SynSent` becomes `SYN_SENT`.
fn state_name(state: &impl fmt::Debug) -> String {
    let debug = format!("{:?}", state);
    let mut name = String::with_capacity(debug.len() + 2);
    for (index, c) in debug.chars().enumerate() {
        if index > 0 && c.is_ascii_uppercase() {
            name.push('_');
        }
        name.push(c.to_ascii_uppercase());
    }
    name
}

fn connection_labels(connection: &Connection, owner: Option<&Owner>) -> [String; 9] {
    let (pid, cmd) = owner.map_or((0, ""), |owner| (owner.pid, owner.cmd.as_str()));
    [
        connection.uid.to_string(),
        pid.to_string(),
        cmd.to_string(),
        connection.protocol.to_string(),
        connection.local.ip().to_string(),
        connection.local.port().to_string(),
        connection.remote.ip().to_string(),
        connection.remote.port().to_string(),
        connection.state.clone(),
    ]
}

/// Map socket inodes to the first process found holding them.
fn socket_owners() -> HashMap<u64, Owner> {
    let mut owners = HashMap::new();
    let processes = match all_processes() {
        Ok(processes) => processes,
        Err(err) => {
            debug!(error = %err, "process table unavailable");
            return owners;
        }
    };

    for process in processes.flatten() {
        // Descriptors of other users' processes are not readable.
        let Ok(fds) = process.fd() else {
            continue;
        };
        let cmd = process
            .cmdline()
            .ok()
            .and_then(|args| args.into_iter().next())
            .unwrap_or_default();

        for fd in fds.flatten() {
            if let FDTarget::Socket(inode) = fd.target {
                owners.entry(inode).or_insert_with(|| Owner {
                    pid: process.pid(),
                    cmd: cmd.clone(),
                });
            }
        }
    }
    owners
}

fn read_connections() -> Vec<Connection> {
    let mut connections = Vec::new();

    for (protocol, table) in [("tcp", procfs::net::tcp()), ("tcp6", procfs::net::tcp6())] {
        extend_table(&mut connections, protocol, table, |entry| {
            (entry.uid, entry.inode, entry.local_address, entry.remote_address, state_name(&entry.state))
        });
    }
    for (protocol, table) in [("udp", procfs::net::udp()), ("udp6", procfs::net::udp6())] {
        extend_table(&mut connections, protocol, table, |entry| {
            (entry.uid, entry.inode, entry.local_address, entry.remote_address, state_name(&entry.state))
        });
    }

    connections
}

/// Append one socket table. A missing table, e.g. tcp6 with IPv6 disabled,
/// is skipped.
fn extend_table<E, F>(
    connections: &mut Vec<Connection>,
    protocol: &'static str,
    table: ProcResult<Vec<E>>,
    fields: F,
) where
    F: Fn(&E) -> (u32, u64, SocketAddr, SocketAddr, String),
{
    let entries = match table {
        Ok(entries) => entries,
        Err(err) => {
            debug!(protocol, error = %err, "socket table unavailable");
            return;
        }
    };

    connections.extend(entries.iter().map(|entry| {
        let (uid, inode, local, remote, state) = fields(entry);
        Connection {
            protocol,
            uid,
            inode,
            local,
            remote,
            state,
        }
    }));
}
