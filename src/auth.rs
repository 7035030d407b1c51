use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{Connection, OptionalExtension};

/// Typed failures the IPC boundary maps to `{code, message}` responses.
///
/// Login failures are deliberately one generic variant: unknown account and
/// wrong password must be indistinguishable to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    InvalidLogin,
    InvalidSignupCredentials,
    CodeAlreadyUsed,
    InvalidChildCode(String),
    MissingChildCodes,
    NotAuthorized,
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidLogin => "auth_failed",
            AuthError::InvalidSignupCredentials => "invalid_credentials",
            AuthError::CodeAlreadyUsed => "code_already_used",
            AuthError::InvalidChildCode(_) => "invalid_child_code",
            AuthError::MissingChildCodes => "bad_params",
            AuthError::NotAuthorized => "not_authorized",
            AuthError::Internal(_) => "db_query_failed",
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidLogin => write!(f, "invalid credentials"),
            AuthError::InvalidSignupCredentials => {
                write!(f, "invalid parent credentials or signup code")
            }
            AuthError::CodeAlreadyUsed => {
                write!(f, "this signup code has already been used")
            }
            AuthError::InvalidChildCode(code) => write!(f, "invalid child code: {}", code),
            AuthError::MissingChildCodes => {
                write!(f, "at least one child code is required")
            }
            AuthError::NotAuthorized => write!(f, "not authorized"),
            AuthError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

/// Argon2id with a random salt, stored as a PHC string so parameters travel
/// with the hash.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|e| AuthError::Internal(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Internal(e.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaffPrincipal {
    pub username: String,
    pub role: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParentPrincipal {
    pub name: String,
    pub email: String,
    pub child_name: String,
    pub linked_children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedParent {
    pub name: String,
    pub email: String,
    pub linked_children: Vec<String>,
}

pub fn authenticate_admin(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<StaffPrincipal, AuthError> {
    let row = conn
        .query_row(
            "SELECT username, password_hash, role, name FROM admins WHERE username = ?1",
            [username],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((username, stored, role, name)) = row else {
        return Err(AuthError::InvalidLogin);
    };
    if !verify_password(password, &stored)? {
        return Err(AuthError::InvalidLogin);
    }
    Ok(StaffPrincipal {
        username,
        role,
        name,
    })
}

pub fn authenticate_parent(
    conn: &Connection,
    email: &str,
    password: &str,
) -> Result<ParentPrincipal, AuthError> {
    let row = conn
        .query_row(
            "SELECT name, email, child_name, password_hash, linked_children
             FROM parents WHERE email = ?1",
            [email],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    let Some((name, email, child_name, stored, linked)) = row else {
        return Err(AuthError::InvalidLogin);
    };
    if !verify_password(password, &stored)? {
        return Err(AuthError::InvalidLogin);
    }
    Ok(ParentPrincipal {
        name,
        email,
        child_name,
        linked_children: parse_linked_children(&linked),
    })
}

/// Explicit caller-supplied principal for admin-gated mutations. Any row in
/// the admins table (role admin or teacher) counts as staff.
pub fn require_staff(conn: &Connection, username: &str) -> Result<StaffPrincipal, AuthError> {
    conn.query_row(
        "SELECT username, role, name FROM admins WHERE username = ?1",
        [username],
        |row| {
            Ok(StaffPrincipal {
                username: row.get(0)?,
                role: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or(AuthError::NotAuthorized)
}

/// Tolerant decode of the `linked_children` JSON column.
pub fn parse_linked_children(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

/// The sole gate between a parent and a student's grades: possession of the
/// child code is not enough, it must be in the parent's linked set.
pub fn authorize_child_access(
    conn: &Connection,
    parent_email: &str,
    child_code: &str,
) -> Result<bool, AuthError> {
    let linked: Option<String> = conn
        .query_row(
            "SELECT linked_children FROM parents WHERE email = ?1",
            [parent_email],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = linked else {
        return Ok(false);
    };
    Ok(parse_linked_children(&raw).iter().any(|c| c == child_code))
}

/// One-shot signup activation. The (email, full name, signup code) triple
/// must match exactly one unused parent record; every supplied child code
/// must name a real student. All-or-nothing: a single invalid code aborts
/// with nothing persisted. The used-once flip is a conditional UPDATE so two
/// racing calls cannot both succeed.
pub fn verify_signup(
    conn: &Connection,
    email: &str,
    full_name: &str,
    signup_code: &str,
    child_codes: &[String],
) -> Result<LinkedParent, AuthError> {
    let row = conn
        .query_row(
            "SELECT id, name, email, signup_code_used FROM parents
             WHERE email = ?1 AND name = ?2 AND signup_code = ?3",
            [email, full_name, signup_code],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((id, name, email, used)) = row else {
        return Err(AuthError::InvalidSignupCredentials);
    };
    if used != 0 {
        return Err(AuthError::CodeAlreadyUsed);
    }

    let mut validated: Vec<String> = Vec::new();
    for code in child_codes {
        let code = code.trim();
        if code.is_empty() || validated.iter().any(|c| c == code) {
            continue;
        }
        let exists = conn
            .query_row(
                "SELECT 1 FROM students WHERE child_code = ?1",
                [code],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(AuthError::InvalidChildCode(code.to_string()));
        }
        validated.push(code.to_string());
    }
    if validated.is_empty() {
        return Err(AuthError::MissingChildCodes);
    }

    let linked_json = serde_json::to_string(&validated)?;
    let updated = conn.execute(
        "UPDATE parents SET signup_code_used = 1, linked_children = ?1
         WHERE id = ?2 AND signup_code_used = 0",
        (&linked_json, &id),
    )?;
    if updated == 0 {
        // Lost the race against a concurrent activation.
        return Err(AuthError::CodeAlreadyUsed);
    }

    Ok(LinkedParent {
        name,
        email,
        linked_children: validated,
    })
}
