//! User records and token management.
//!
//! Users persist in the same session store as the graph. Passwords are
//! argon2-hashed; tokens are HS256 JWTs carrying `{sub, iat, exp}` where
//! `sub` is the username. The signing secret is generated once per store
//! and persisted, so tokens stay valid across restarts. Refresh accepts a
//! token whose `iat` is still inside the refresh window even if the token
//! itself has expired.

use std::fmt;
use std::path::Path;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use jac_core::error::StorageError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anchor::Anchor;
use crate::memory::GraphMemory;

const SECRET_KEY: &str = "jwt_secret";
/// Tokens live for a day; refresh accepts originals up to a week old.
pub const TOKEN_TTL_SECS: i64 = 60 * 60 * 24;
pub const DEFAULT_REFRESH_WINDOW_SECS: i64 = 60 * 60 * 24 * 7;

#[derive(Debug)]
pub enum UserError {
    UserExists(String),
    Storage(StorageError),
    Token(String),
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserError::UserExists(name) => write!(f, "user '{name}' already exists"),
            UserError::Storage(err) => write!(f, "{err}"),
            UserError::Token(msg) => write!(f, "token error: {msg}"),
        }
    }
}

impl std::error::Error for UserError {}

impl From<StorageError> for UserError {
    fn from(err: StorageError) -> Self {
        UserError::Storage(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub username: String,
    pub token: String,
    pub root_id: Uuid,
}

pub struct UserManager {
    memory: GraphMemory,
    secret: Vec<u8>,
    refresh_window_secs: i64,
}

impl UserManager {
    /// Open the user table in the session store under `base_path`.
    pub fn open(base_path: &Path) -> Result<Self, UserError> {
        let memory = GraphMemory::open(base_path)?;
        let secret = match memory.meta_get(SECRET_KEY)? {
            Some(hex) => hex_decode(&hex),
            None => {
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                memory.meta_set(SECRET_KEY, &hex_encode(&bytes))?;
                bytes.to_vec()
            }
        };
        Ok(Self {
            memory,
            secret,
            refresh_window_secs: DEFAULT_REFRESH_WINDOW_SECS,
        })
    }

    pub fn with_refresh_window(mut self, secs: i64) -> Self {
        self.refresh_window_secs = secs;
        self
    }

    /// Create a user: hash the password, mint a root anchor and a token.
    pub fn register(&self, username: &str, password: &str) -> Result<UserRecord, UserError> {
        if self.lookup(username)?.is_some() {
            return Err(UserError::UserExists(username.to_string()));
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| UserError::Token(format!("hash failure: {e}")))?
            .to_string();

        let root_id = Uuid::new_v4();
        self.memory.put(&Anchor::new_root(root_id))?;

        let iat = chrono::Utc::now().timestamp();
        let token = self.mint(username, iat)?;

        self.memory_conn_insert(username, &hash, &token, root_id, iat)?;
        tracing::info!(user = username, root = %root_id, "registered user");
        Ok(UserRecord {
            username: username.to_string(),
            token,
            root_id,
        })
    }

    /// Verify credentials; returns the stored record on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserRecord>, UserError> {
        let Some((hash, record)) = self.lookup(username)? else {
            return Ok(None);
        };
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| UserError::Token(format!("stored hash invalid: {e}")))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Validate a bearer token; returns the username (`sub`) when the token
    /// is well-formed, unexpired, and belongs to a known user.
    pub fn validate(&self, token: &str) -> Result<Option<String>, UserError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);
        let Ok(data) = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        ) else {
            return Ok(None);
        };
        Ok(self.lookup(&data.claims.sub)?.map(|(_, r)| r.username))
    }

    /// The user record for a validated token's subject.
    pub fn record_for_token(&self, token: &str) -> Result<Option<UserRecord>, UserError> {
        let Some(username) = self.validate(token)? else {
            return Ok(None);
        };
        Ok(self.lookup(&username)?.map(|(_, r)| r))
    }

    /// Mint a fresh token for a still-refreshable one. Expired tokens are
    /// accepted as long as their `iat` is inside the refresh window; older
    /// tokens are refused. `sub` is preserved, `iat`/`exp` move forward.
    pub fn refresh(&self, token: &str) -> Result<Option<UserRecord>, UserError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);
        validation.validate_exp = false;
        let Ok(data) = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        ) else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        if now - data.claims.iat > self.refresh_window_secs {
            return Ok(None);
        }
        let Some((_, record)) = self.lookup(&data.claims.sub)? else {
            return Ok(None);
        };

        // A strictly newer iat guarantees the refreshed token differs.
        let iat = now.max(data.claims.iat + 1);
        let new_token = self.mint(&record.username, iat)?;
        self.memory
            .connection_execute(
                "UPDATE users SET token = ?1 WHERE username = ?2",
                rusqlite::params![new_token, record.username],
            )
            .map_err(UserError::Storage)?;
        Ok(Some(UserRecord {
            username: record.username,
            token: new_token,
            root_id: record.root_id,
        }))
    }

    pub fn close(self) -> Result<(), UserError> {
        self.memory.close()?;
        Ok(())
    }

    fn mint(&self, username: &str, iat: i64) -> Result<String, UserError> {
        let claims = Claims {
            sub: username.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| UserError::Token(e.to_string()))
    }

    fn lookup(&self, username: &str) -> Result<Option<(String, UserRecord)>, UserError> {
        let row = self
            .memory
            .connection_query_row(
                "SELECT password_hash, token, root_id FROM users WHERE username = ?1",
                rusqlite::params![username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(UserError::Storage)?;
        let Some((hash, token, root_raw)) = row else {
            return Ok(None);
        };
        let root_id = Uuid::parse_str(&root_raw)
            .map_err(|e| UserError::Storage(StorageError::CorruptAnchor(e.to_string())))?;
        Ok(Some((
            hash,
            UserRecord {
                username: username.to_string(),
                token,
                root_id,
            },
        )))
    }

    fn memory_conn_insert(
        &self,
        username: &str,
        hash: &str,
        token: &str,
        root_id: Uuid,
        iat: i64,
    ) -> Result<(), UserError> {
        self.memory
            .connection_execute(
                "INSERT INTO users (username, password_hash, token, root_id, created_iat)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![username, hash, token, root_id.to_string(), iat],
            )
            .map_err(UserError::Storage)?;
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect()
}

impl GraphMemory {
    /// Narrow SQL escape hatch for the user table, which shares the session
    /// store but is not made of anchors.
    pub(crate) fn connection_execute(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), StorageError> {
        self.raw_connection()
            .execute(sql, params)
            .map(|_| ())
            .map_err(|e| StorageError::TransientIO(e.to_string()))
    }

    pub(crate) fn connection_query_row<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        f: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, StorageError> {
        self.raw_connection()
            .query_row(sql, params, f)
            .optional()
            .map_err(|e| StorageError::TransientIO(e.to_string()))
    }
}
