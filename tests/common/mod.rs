//! In-memory PostgreSQL backend for driving `Conn` without a server.
//!
//! [`MockStream`] parses every frontend message the client writes, records
//! it in a shared log, and queues the backend's answer for the client to
//! read. [`Backend`] answers the way a real server would for the startup,
//! simple query and extended query flows, including skip-to-Sync after an
//! error and row-limited portals.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};

use pgcore::Opts;
use pgcore::sync::Conn;

pub const PID: u32 = 4242;
pub const SECRET: u32 = 0x5EC2E7;

pub const BOOL: u32 = 16;
pub const INT8: u32 = 20;
pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const FLOAT8: u32 = 701;

/// One message the client sent. Startup and CancelRequest have no tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendMessage {
    pub tag: Option<u8>,
    pub payload: Vec<u8>,
}

impl FrontendMessage {
    pub fn tag_char(&self) -> char {
        self.tag.map_or('-', char::from)
    }
}

pub type Log = Arc<Mutex<Vec<FrontendMessage>>>;

/// Tags of every logged message, e.g. `"PDSBDES"`.
pub fn tags(log: &Log) -> String {
    log.lock().unwrap().iter().map(FrontendMessage::tag_char).collect()
}

/// Logged messages with `tag`.
pub fn sent(log: &Log, tag: u8) -> Vec<Vec<u8>> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|m| m.tag == Some(tag))
        .map(|m| m.payload.clone())
        .collect()
}

pub fn clear(log: &Log) {
    log.lock().unwrap().clear();
}

// === Backend message builders ===

pub mod msg {
    pub fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        frame(b'R', &payload)
    }

    pub fn auth_ok() -> Vec<u8> {
        auth(0, b"")
    }

    pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
        frame(b'S', format!("{name}\0{value}\0").as_bytes())
    }

    pub fn backend_key(pid: u32, secret: u32) -> Vec<u8> {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(&secret.to_be_bytes());
        frame(b'K', &payload)
    }

    pub fn ready(status: u8) -> Vec<u8> {
        frame(b'Z', &[status])
    }

    fn fields(severity: &str, code: &str, message: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
            payload.push(field);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        payload
    }

    pub fn error(severity: &str, code: &str, message: &str) -> Vec<u8> {
        frame(b'E', &fields(severity, code, message))
    }

    pub fn notice(severity: &str, message: &str) -> Vec<u8> {
        frame(b'N', &fields(severity, "00000", message))
    }

    pub fn notification(pid: u32, channel: &str, payload: &str) -> Vec<u8> {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(format!("{channel}\0{payload}\0").as_bytes());
        frame(b'A', &body)
    }

    pub fn row_description(columns: &[(&str, u32, i16)]) -> Vec<u8> {
        let mut payload = (columns.len() as i16).to_be_bytes().to_vec();
        for (name, oid, format) in columns {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0u32.to_be_bytes());
            payload.extend_from_slice(&0i16.to_be_bytes());
            payload.extend_from_slice(&oid.to_be_bytes());
            payload.extend_from_slice(&(-1i16).to_be_bytes());
            payload.extend_from_slice(&(-1i32).to_be_bytes());
            payload.extend_from_slice(&format.to_be_bytes());
        }
        frame(b'T', &payload)
    }

    pub fn data_row(cells: &[Option<Vec<u8>>]) -> Vec<u8> {
        let mut payload = (cells.len() as i16).to_be_bytes().to_vec();
        for cell in cells {
            match cell {
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        frame(b'D', &payload)
    }

    pub fn command_complete(tag: &str) -> Vec<u8> {
        frame(b'C', format!("{tag}\0").as_bytes())
    }

    pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
        let mut payload = (oids.len() as i16).to_be_bytes().to_vec();
        for oid in oids {
            payload.extend_from_slice(&oid.to_be_bytes());
        }
        frame(b't', &payload)
    }

    pub fn parse_complete() -> Vec<u8> {
        frame(b'1', b"")
    }

    pub fn bind_complete() -> Vec<u8> {
        frame(b'2', b"")
    }

    pub fn close_complete() -> Vec<u8> {
        frame(b'3', b"")
    }

    pub fn no_data() -> Vec<u8> {
        frame(b'n', b"")
    }

    pub fn portal_suspended() -> Vec<u8> {
        frame(b's', b"")
    }

    pub fn empty_query() -> Vec<u8> {
        frame(b'I', b"")
    }
}

// === Frontend payload readers ===

fn cstr(data: &[u8]) -> (String, &[u8]) {
    let end = data.iter().position(|&b| b == 0).expect("unterminated string");
    (
        String::from_utf8(data[..end].to_vec()).expect("non-UTF-8 string"),
        &data[end + 1..],
    )
}

fn be_i16(data: &[u8]) -> (i16, &[u8]) {
    (i16::from_be_bytes([data[0], data[1]]), &data[2..])
}

fn be_i32(data: &[u8]) -> (i32, &[u8]) {
    (
        i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        &data[4..],
    )
}

/// A decoded Bind message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<i16>,
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<i16>,
}

impl Bind {
    pub fn parse(payload: &[u8]) -> Self {
        let (portal, rest) = cstr(payload);
        let (statement, rest) = cstr(rest);
        let (count, mut rest) = be_i16(rest);
        let mut param_formats = Vec::new();
        for _ in 0..count {
            let (format, tail) = be_i16(rest);
            param_formats.push(format);
            rest = tail;
        }
        let (count, mut rest) = be_i16(rest);
        let mut params = Vec::new();
        for _ in 0..count {
            let (len, tail) = be_i32(rest);
            if len < 0 {
                params.push(None);
                rest = tail;
            } else {
                params.push(Some(tail[..len as usize].to_vec()));
                rest = &tail[len as usize..];
            }
        }
        let (count, mut rest) = be_i16(rest);
        let mut result_formats = Vec::new();
        for _ in 0..count {
            let (format, tail) = be_i16(rest);
            result_formats.push(format);
            rest = tail;
        }
        Self {
            portal,
            statement,
            param_formats,
            params,
            result_formats,
        }
    }

    /// Format of result column `index`, per the Bind rules.
    fn result_format(&self, index: usize) -> i16 {
        match self.result_formats.len() {
            0 => 0,
            1 => self.result_formats[0],
            _ => self.result_formats[index],
        }
    }
}

// === Statements the backend knows ===

/// How the backend answers one SQL string.
#[derive(Debug, Clone, Default)]
pub struct Stmt {
    pub param_oids: Vec<u32>,
    pub columns: Vec<(String, u32)>,
    /// Answers Describe with a RowDescription, even one with no columns
    pub returns_rows: bool,
    /// Cells in text form; encoded per the requested result format
    pub rows: Vec<Vec<Option<String>>>,
    pub tag: String,
    /// `(severity, sqlstate, message)` raised on Execute or Query
    pub error: Option<(String, String, String)>,
    /// Raw backend messages sent before the results
    pub before: Vec<Vec<u8>>,
    /// Raw backend messages sent after ReadyForQuery of a simple query
    pub after: Vec<Vec<u8>>,
}

impl Stmt {
    pub fn command(tag: &str) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn rows(columns: &[(&str, u32)], rows: &[&[Option<&str>]]) -> Self {
        Self {
            columns: columns.iter().map(|(n, o)| (n.to_string(), *o)).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
            tag: format!("SELECT {}", rows.len()),
            returns_rows: true,
            ..Self::default()
        }
    }

    pub fn failing(code: &str, message: &str) -> Self {
        Self {
            error: Some(("ERROR".into(), code.into(), message.into())),
            ..Self::default()
        }
    }

    pub fn fatal(code: &str, message: &str) -> Self {
        Self {
            error: Some(("FATAL".into(), code.into(), message.into())),
            ..Self::default()
        }
    }

    pub fn params(mut self, oids: &[u32]) -> Self {
        self.param_oids = oids.to_vec();
        self
    }

    pub fn before(mut self, message: Vec<u8>) -> Self {
        self.before.push(message);
        self
    }

    pub fn after(mut self, message: Vec<u8>) -> Self {
        self.after.push(message);
        self
    }
}

fn encode_cell(oid: u32, format: i16, text: &str) -> Vec<u8> {
    if format == 0 {
        return text.as_bytes().to_vec();
    }
    match oid {
        BOOL => vec![u8::from(text == "t")],
        INT4 => text.parse::<i32>().unwrap().to_be_bytes().to_vec(),
        INT8 => text.parse::<i64>().unwrap().to_be_bytes().to_vec(),
        FLOAT8 => text.parse::<f64>().unwrap().to_be_bytes().to_vec(),
        _ => text.as_bytes().to_vec(),
    }
}

// === SCRAM-SHA-256 server side ===

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Server half of SCRAM-SHA-256, written against RFC 5802 and RFC 7677.
#[derive(Debug, Clone)]
pub struct ScramServer {
    pub password: String,
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub server_nonce: String,
    pub mechanisms: Vec<String>,
    /// Send a wrong ServerSignature in server-final-message
    pub tamper_signature: bool,
    exchange: Option<(String, String, String)>,
}

impl ScramServer {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.into(),
            salt: b"pgcore-test-salt".to_vec(),
            iterations: 4096,
            server_nonce: "3rfcNHYJY1ZVvWVs7j".into(),
            mechanisms: vec!["SCRAM-SHA-256".into()],
            tamper_signature: false,
            exchange: None,
        }
    }

    fn salted_password(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &self.salt,
            self.iterations,
            &mut out,
        );
        out
    }

    /// Handle SASLInitialResponse; returns server-first-message.
    fn first(&mut self, payload: &[u8]) -> String {
        let (_mechanism, rest) = cstr(payload);
        let (len, rest) = be_i32(rest);
        let client_first = String::from_utf8(rest[..len as usize].to_vec()).unwrap();

        let header_end = client_first.match_indices(',').nth(1).unwrap().0 + 1;
        let gs2_header = client_first[..header_end].to_string();
        let bare = client_first[header_end..].to_string();
        let client_nonce = bare
            .split(',')
            .find_map(|attr| attr.strip_prefix("r="))
            .unwrap();

        let server_first = format!(
            "r={client_nonce}{},s={},i={}",
            self.server_nonce,
            STANDARD.encode(&self.salt),
            self.iterations
        );
        self.exchange = Some((gs2_header, bare, server_first.clone()));
        server_first
    }

    /// Handle the client-final-message; `Ok` holds server-final-message.
    fn last(&mut self, payload: &[u8]) -> Result<String, &'static str> {
        let client_final = String::from_utf8(payload.to_vec()).unwrap();
        let (gs2_header, bare, server_first) = self.exchange.take().unwrap();

        let proof_at = client_final.rfind(",p=").ok_or("missing proof")?;
        let without_proof = &client_final[..proof_at];
        let proof = STANDARD
            .decode(&client_final[proof_at + 3..])
            .map_err(|_| "bad proof encoding")?;

        let cbind = without_proof
            .split(',')
            .find_map(|attr| attr.strip_prefix("c="))
            .ok_or("missing channel binding")?;
        if cbind != STANDARD.encode(gs2_header.as_bytes()) {
            return Err("channel binding mismatch");
        }

        let auth_message = format!("{bare},{server_first},{without_proof}");
        let salted = self.salted_password();
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let signature = hmac(&stored_key, auth_message.as_bytes());
        let recovered: Vec<u8> = proof.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
        if Sha256::digest(&recovered) != stored_key || proof.len() != 32 {
            return Err("invalid-proof");
        }

        let server_key = hmac(&salted, b"Server Key");
        let mut server_signature = hmac(&server_key, auth_message.as_bytes());
        if self.tamper_signature {
            server_signature[0] ^= 0xFF;
        }
        Ok(format!("v={}", STANDARD.encode(server_signature)))
    }
}

/// MD5 password hash as the server stores and compares it.
pub fn md5_hash(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = format!("{:x}", Md5::digest(format!("{password}{user}").as_bytes()));
    let mut outer = inner.into_bytes();
    outer.extend_from_slice(salt);
    format!("md5{:x}", Md5::digest(&outer))
}

// === Backend ===

#[derive(Debug, Clone)]
pub enum Auth {
    Trust,
    Cleartext(String),
    Md5 { password: String, salt: [u8; 4] },
    Scram(ScramServer),
    /// Request an authentication method by code and wait
    Unsupported(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Auth,
    ScramFinal,
    Ready,
    Closed,
}

#[derive(Debug)]
struct PortalState {
    bind: Bind,
    sql: String,
    position: usize,
}

/// Scripted PostgreSQL backend.
#[derive(Debug)]
pub struct Backend {
    pub auth: Auth,
    pub statements: HashMap<String, Stmt>,
    /// Messages sent right after AuthenticationOk
    pub startup_extra: Vec<Vec<u8>>,
    phase: Phase,
    user: String,
    status: u8,
    skip_to_sync: bool,
    prepared: HashMap<String, String>,
    portals: HashMap<String, PortalState>,
}

impl Backend {
    pub fn new(auth: Auth) -> Self {
        Self {
            auth,
            statements: HashMap::new(),
            startup_extra: Vec::new(),
            phase: Phase::Startup,
            user: String::new(),
            status: b'I',
            skip_to_sync: false,
            prepared: HashMap::new(),
            portals: HashMap::new(),
        }
    }

    pub fn trust() -> Self {
        Self::new(Auth::Trust)
    }

    pub fn with(mut self, sql: &str, stmt: Stmt) -> Self {
        self.statements.insert(sql.to_string(), stmt);
        self
    }

    fn ready_messages(&mut self, out: &mut Vec<u8>) {
        out.extend(msg::auth_ok());
        for extra in self.startup_extra.drain(..) {
            out.extend(extra);
        }
        out.extend(msg::parameter_status("server_version", "16.2"));
        out.extend(msg::parameter_status("client_encoding", "UTF8"));
        out.extend(msg::backend_key(PID, SECRET));
        out.extend(msg::ready(b'I'));
        self.phase = Phase::Ready;
    }

    fn fail_auth(&mut self, out: &mut Vec<u8>, message: &str) {
        out.extend(msg::error("FATAL", "28P01", message));
        self.phase = Phase::Closed;
    }

    fn respond(&mut self, message: &FrontendMessage, out: &mut Vec<u8>) {
        match (self.phase, message.tag) {
            (_, Some(b'X')) => self.phase = Phase::Closed,
            // The backend exited; the rest of the batch goes nowhere.
            (Phase::Closed, _) => {}
            (Phase::Startup, None) => self.startup(&message.payload, out),
            (Phase::Auth, Some(b'p')) => self.password(&message.payload, out),
            (Phase::ScramFinal, Some(b'p')) => self.scram_final(&message.payload, out),
            (Phase::Ready, Some(tag)) => self.query_message(tag, &message.payload, out),
            (phase, tag) => panic!("backend got {tag:?} in {phase:?}"),
        }
    }

    fn startup(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let (code, mut rest) = be_i32(payload);
        if code == 80_877_102 {
            // CancelRequest: the backend closes without answering.
            self.phase = Phase::Closed;
            return;
        }
        assert_eq!(code, 196_608, "protocol 3.0");
        while rest.first() != Some(&0) {
            let (name, tail) = cstr(rest);
            let (value, tail) = cstr(tail);
            if name == "user" {
                self.user = value;
            }
            rest = tail;
        }

        self.phase = Phase::Auth;
        match &self.auth {
            Auth::Trust => self.ready_messages(out),
            Auth::Cleartext(_) => out.extend(msg::auth(3, b"")),
            Auth::Md5 { salt, .. } => out.extend(msg::auth(5, salt)),
            Auth::Scram(server) => {
                let mut list = Vec::new();
                for mechanism in &server.mechanisms {
                    list.extend_from_slice(mechanism.as_bytes());
                    list.push(0);
                }
                list.push(0);
                out.extend(msg::auth(10, &list));
            }
            Auth::Unsupported(code) => out.extend(msg::auth(*code, b"")),
        }
    }

    fn password(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let auth = self.auth.clone();
        match auth {
            Auth::Cleartext(password) => {
                if cstr(payload).0 == password {
                    self.ready_messages(out);
                } else {
                    self.fail_auth(out, "password authentication failed");
                }
            }
            Auth::Md5 { password, salt } => {
                if cstr(payload).0 == md5_hash(&self.user, &password, &salt) {
                    self.ready_messages(out);
                } else {
                    self.fail_auth(out, "password authentication failed");
                }
            }
            Auth::Scram(mut server) => {
                let server_first = server.first(payload);
                self.auth = Auth::Scram(server);
                self.phase = Phase::ScramFinal;
                out.extend(msg::auth(11, server_first.as_bytes()));
            }
            other => panic!("unexpected password message for {other:?}"),
        }
    }

    fn scram_final(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let Auth::Scram(server) = &mut self.auth else {
            unreachable!()
        };
        match server.last(payload) {
            Ok(server_final) => {
                out.extend(msg::auth(12, server_final.as_bytes()));
                self.ready_messages(out);
            }
            Err(reason) => self.fail_auth(out, reason),
        }
    }

    fn statement(&self, sql: &str) -> Result<Stmt, Vec<u8>> {
        self.statements.get(sql).cloned().ok_or_else(|| {
            msg::error(
                "ERROR",
                "42601",
                &format!("syntax error in {sql:?}"),
            )
        })
    }

    fn raise(&mut self, out: &mut Vec<u8>, error: Vec<u8>) {
        out.extend(error);
        if self.status == b'T' {
            self.status = b'E';
        }
    }

    fn transaction_control(&mut self, sql: &str) -> Option<&'static str> {
        match sql {
            "BEGIN" => {
                self.status = b'T';
                Some("BEGIN")
            }
            "COMMIT" => {
                let tag = if self.status == b'E' { "ROLLBACK" } else { "COMMIT" };
                self.status = b'I';
                self.portals.clear();
                Some(tag)
            }
            "ROLLBACK" => {
                self.status = b'I';
                self.portals.clear();
                Some("ROLLBACK")
            }
            _ => None,
        }
    }

    fn query_message(&mut self, tag: u8, payload: &[u8], out: &mut Vec<u8>) {
        if tag == b'Q' {
            let sql = cstr(payload).0;
            self.simple_query(&sql, out);
            out.extend(msg::ready(self.status));
            if let Some(stmt) = self.statements.get(&sql) {
                for message in &stmt.after {
                    out.extend_from_slice(message);
                }
            }
            return;
        }
        if tag == b'S' {
            self.skip_to_sync = false;
            if self.status == b'I' {
                self.portals.remove("");
            }
            out.extend(msg::ready(self.status));
            return;
        }
        if self.skip_to_sync {
            return;
        }
        if self.status == b'E' && tag != b'H' {
            let error = msg::error(
                "ERROR",
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            );
            self.fail(out, error);
            return;
        }
        match tag {
            b'P' => {
                let (name, rest) = cstr(payload);
                let (sql, _) = cstr(rest);
                match self.statement(&sql) {
                    Ok(_) => {
                        self.prepared.insert(name, sql);
                        out.extend(msg::parse_complete());
                    }
                    Err(error) => self.fail(out, error),
                }
            }
            b'D' => {
                let kind = payload[0];
                let (name, _) = cstr(&payload[1..]);
                if kind == b'S' {
                    let sql = self.prepared.get(&name).cloned().unwrap_or_default();
                    let stmt = self.statements.get(&sql).cloned().unwrap_or_default();
                    out.extend(msg::parameter_description(&stmt.param_oids));
                    out.extend(Self::describe_rows(&stmt, None));
                } else {
                    let Some(portal) = self.portals.get(&name) else {
                        let error = msg::error("ERROR", "34000", "portal does not exist");
                        self.fail(out, error);
                        return;
                    };
                    let stmt = self.statements.get(&portal.sql).cloned().unwrap_or_default();
                    out.extend(Self::describe_rows(&stmt, Some(&portal.bind)));
                }
            }
            b'B' => {
                let bind = Bind::parse(payload);
                let Some(sql) = self.prepared.get(&bind.statement).cloned() else {
                    let error = msg::error("ERROR", "26000", "prepared statement does not exist");
                    self.fail(out, error);
                    return;
                };
                let expected = self.statements.get(&sql).map_or(0, |s| s.param_oids.len());
                if bind.params.len() != expected {
                    let error = msg::error("ERROR", "08P01", "bind message parameter count mismatch");
                    self.fail(out, error);
                    return;
                }
                self.portals.insert(
                    bind.portal.clone(),
                    PortalState {
                        bind,
                        sql,
                        position: 0,
                    },
                );
                out.extend(msg::bind_complete());
            }
            b'E' => {
                let (name, rest) = cstr(payload);
                let (max_rows, _) = be_i32(rest);
                self.execute(&name, max_rows, out);
            }
            b'C' => {
                let kind = payload[0];
                let (name, _) = cstr(&payload[1..]);
                if kind == b'S' {
                    self.prepared.remove(&name);
                } else {
                    self.portals.remove(&name);
                }
                out.extend(msg::close_complete());
            }
            b'H' => {}
            other => panic!("unexpected frontend message {:?}", other as char),
        }
    }

    fn fail(&mut self, out: &mut Vec<u8>, error: Vec<u8>) {
        self.raise(out, error);
        self.skip_to_sync = true;
    }

    fn describe_rows(stmt: &Stmt, bind: Option<&Bind>) -> Vec<u8> {
        if !stmt.returns_rows {
            return msg::no_data();
        }
        let columns: Vec<(&str, u32, i16)> = stmt
            .columns
            .iter()
            .enumerate()
            .map(|(i, (name, oid))| (name.as_str(), *oid, bind.map_or(0, |b| b.result_format(i))))
            .collect();
        msg::row_description(&columns)
    }

    fn execute(&mut self, name: &str, max_rows: i32, out: &mut Vec<u8>) {
        let Some(portal) = self.portals.get_mut(name) else {
            let error = msg::error("ERROR", "34000", "portal does not exist");
            self.fail(out, error);
            return;
        };
        let stmt = self.statements.get(&portal.sql).cloned().unwrap_or_default();
        for message in &stmt.before {
            out.extend_from_slice(message);
        }
        if let Some((severity, code, message)) = &stmt.error {
            let error = msg::error(severity, code, message);
            self.fail(out, error);
            if severity == "FATAL" {
                self.phase = Phase::Closed;
            }
            return;
        }

        let limit = if max_rows <= 0 {
            usize::MAX
        } else {
            max_rows as usize
        };
        let start = portal.position;
        let end = stmt.rows.len().min(start.saturating_add(limit));
        for row in &stmt.rows[start..end] {
            let cells: Vec<Option<Vec<u8>>> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    cell.as_deref()
                        .map(|text| encode_cell(stmt.columns[i].1, portal.bind.result_format(i), text))
                })
                .collect();
            out.extend(msg::data_row(&cells));
        }
        portal.position = end;

        if end < stmt.rows.len() {
            out.extend(msg::portal_suspended());
        } else if !stmt.returns_rows {
            out.extend(msg::command_complete(&stmt.tag));
        } else {
            out.extend(msg::command_complete(&format!("SELECT {}", end - start)));
        }
    }

    fn simple_query(&mut self, sql: &str, out: &mut Vec<u8>) {
        if sql.trim().is_empty() {
            out.extend(msg::empty_query());
            return;
        }
        if let Some(tag) = self.transaction_control(sql) {
            out.extend(msg::command_complete(tag));
            return;
        }
        if self.status == b'E' {
            let error = msg::error(
                "ERROR",
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            );
            self.raise(out, error);
            return;
        }
        let stmt = match self.statement(sql) {
            Ok(stmt) => stmt,
            Err(error) => return self.raise(out, error),
        };
        for message in &stmt.before {
            out.extend_from_slice(message);
        }
        if let Some((severity, code, message)) = &stmt.error {
            let error = msg::error(severity, code, message);
            self.raise(out, error);
            return;
        }
        if stmt.returns_rows {
            let columns: Vec<(&str, u32, i16)> = stmt
                .columns
                .iter()
                .map(|(name, oid)| (name.as_str(), *oid, 0))
                .collect();
            out.extend(msg::row_description(&columns));
            for row in &stmt.rows {
                let cells: Vec<Option<Vec<u8>>> = row
                    .iter()
                    .map(|cell| cell.as_ref().map(|text| text.as_bytes().to_vec()))
                    .collect();
                out.extend(msg::data_row(&cells));
            }
        }
        out.extend(msg::command_complete(&stmt.tag));
    }
}

// === Stream ===

/// Byte stream connected to a [`Backend`].
#[derive(Debug)]
pub struct MockStream {
    backend: Backend,
    pending: Vec<u8>,
    outgoing: VecDeque<u8>,
    started: bool,
    log: Log,
}

impl MockStream {
    pub fn new(backend: Backend) -> (Self, Log) {
        let log = Log::default();
        let stream = Self {
            backend,
            pending: Vec::new(),
            outgoing: VecDeque::new(),
            started: false,
            log: Arc::clone(&log),
        };
        (stream, log)
    }

    /// Queue backend messages the client has not asked for, e.g. a
    /// notification arriving while idle.
    pub fn push(&mut self, bytes: &[u8]) {
        self.outgoing.extend(bytes);
    }

    fn next_frame(&mut self) -> Option<FrontendMessage> {
        if !self.started {
            if self.pending.len() < 4 {
                return None;
            }
            let len = i32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if self.pending.len() < len {
                return None;
            }
            let frame: Vec<u8> = self.pending.drain(..len).collect();
            self.started = true;
            return Some(FrontendMessage {
                tag: None,
                payload: frame[4..].to_vec(),
            });
        }
        if self.pending.len() < 5 {
            return None;
        }
        let len = i32::from_be_bytes([
            self.pending[1],
            self.pending[2],
            self.pending[3],
            self.pending[4],
        ]) as usize;
        if self.pending.len() < len + 1 {
            return None;
        }
        let frame: Vec<u8> = self.pending.drain(..len + 1).collect();
        Some(FrontendMessage {
            tag: Some(frame[0]),
            payload: frame[5..].to_vec(),
        })
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(self.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(message) = self.next_frame() {
            let mut out = Vec::new();
            self.backend.respond(&message, &mut out);
            self.outgoing.extend(out);
            self.log.lock().unwrap().push(message);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn opts(password: Option<&str>) -> Opts {
    Opts {
        user: "alice".into(),
        database: Some("app".into()),
        password: password.map(Into::into),
        ..Opts::default()
    }
}

/// Connect to `backend` with trust-style options.
pub fn connect(backend: Backend) -> (Conn<MockStream>, Log) {
    let (stream, log) = MockStream::new(backend);
    let conn = Conn::new_with_stream(stream, opts(Some("secret"))).unwrap();
    clear(&log);
    (conn, log)
}
