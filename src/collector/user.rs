//! Local account and login session collector.

use crate::collector::traits::Collector;
use crate::collector::{gather_vecs, info_vec};
use crate::config::UserConfig;
use crate::error::{ExporterError, Result};
use chrono::DateTime;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

const SUBSYSTEM: &str = "user";

// glibc `struct utmp` layout on Linux.
const UTMP_RECORD_SIZE: usize = 384;
const UTMP_USER_PROCESS: i16 = 7;
const UT_LINE: std::ops::Range<usize> = 8..40;
const UT_USER: std::ops::Range<usize> = 44..76;
const UT_TV_SEC: std::ops::Range<usize> = 340..344;

/// An account from the passwd database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub username: String,
    pub uid: String,
    pub gid: String,
    pub name: String,
    pub home_dir: String,
}

/// A login session from the utmp database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedUser {
    pub username: String,
    pub tty: String,
    pub login_time: String,
}

/// Parse passwd(5) content. Comment and malformed lines are skipped.
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            // GECOS may carry room and phone numbers after the full name.
            let name = fields[4].split(',').next().unwrap_or_default();
            Some(PasswdEntry {
                username: fields[0].to_string(),
                uid: fields[2].to_string(),
                gid: fields[3].to_string(),
                name: name.to_string(),
                home_dir: fields[5].to_string(),
            })
        })
        .collect()
}

/// Parse binary utmp records, keeping only user login processes.
pub fn parse_utmp(data: &[u8]) -> Vec<LoggedUser> {
    data.chunks_exact(UTMP_RECORD_SIZE)
        .filter(|record| i16::from_ne_bytes([record[0], record[1]]) == UTMP_USER_PROCESS)
        .filter_map(|record| {
            let seconds = i32::from_ne_bytes(record[UT_TV_SEC].try_into().ok()?);
            let login_time = DateTime::from_timestamp(i64::from(seconds), 0)?;
            Some(LoggedUser {
                username: c_string(&record[UT_USER]),
                tty: c_string(&record[UT_LINE]),
                login_time: login_time.to_rfc3339(),
            })
        })
        .collect()
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Reports accounts from passwd and users currently logged in according to utmp.
pub struct UserCollector {
    passwd_path: PathBuf,
    utmp_path: PathBuf,
    update_lock: Mutex<()>,
    exist: GaugeVec,
    logged: GaugeVec,
}

impl UserCollector {
    pub fn new(namespace: &str, config: &UserConfig) -> Result<Self> {
        Ok(Self {
            passwd_path: config.passwd_path.clone(),
            utmp_path: config.utmp_path.clone(),
            update_lock: Mutex::new(()),
            exist: info_vec(
                namespace,
                SUBSYSTEM,
                "exist",
                "Existing users from the passwd database",
                &["uid", "gid", "username", "name", "homedir"],
            )?,
            logged: info_vec(
                namespace,
                SUBSYSTEM,
                "logged",
                "Logged in users from the utmp database",
                &["username", "tty", "logintime"],
            )?,
        })
    }

    fn read_logged(&self) -> Result<Vec<LoggedUser>> {
        match fs::read(&self.utmp_path) {
            Ok(data) => Ok(parse_utmp(&data)),
            // Systems without utmp have nobody logged in as far as we can tell.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Collector for UserCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }

    fn update(&self) -> Result<Vec<MetricFamily>> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.exist.reset();
        self.logged.reset();

        let passwd = fs::read_to_string(&self.passwd_path).map_err(|e| {
            ExporterError::collector_error(
                SUBSYSTEM,
                format!("reading {}: {}", self.passwd_path.display(), e),
            )
        })?;
        for user in parse_passwd(&passwd) {
            self.exist
                .with_label_values(&[&user.uid, &user.gid, &user.username, &user.name, &user.home_dir])
                .set(1.0);
        }

        for user in self.read_logged()? {
            self.logged
                .with_label_values(&[&user.username, &user.tty, &user.login_time])
                .set(1.0);
        }

        Ok(gather_vecs(&[&self.exist, &self.logged]))
    }
}
