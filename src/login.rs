use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, Result};

/// Checks credentials on behalf of the web layer.
pub trait Authenticator: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<bool>;
}

/// User data structure representing a registered application user
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Email address
    #[serde(default)]
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,
}

/// Users stored in a JSON file with Argon2 password hashes.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    path: PathBuf,
}

impl UserDirectory {
    /// Opens the users file, creating it with no users if it doesn't exist.
    ///
    /// # Errors
    /// * `Storage` if the directory or file cannot be created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, b"{}")?;
        }
        Ok(UserDirectory { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get all registered users
    ///
    /// # Errors
    /// * `Storage` if the users file cannot be read
    /// * `Serialization` if it cannot be parsed
    pub fn users(&self) -> Result<HashMap<String, User>> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<()> {
        let json = serde_json::to_string_pretty(users)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Register a new user
    ///
    /// The password is hashed before storage.
    ///
    /// # Errors
    /// * `Validation` if the username or password is empty
    /// * `Conflict` if the username or email is already in use
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<()> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(RegistryError::Validation(
                "usuário e senha são obrigatórios".to_string(),
            ));
        }

        let mut users = self.users()?;
        if users.contains_key(username) {
            return Err(RegistryError::Conflict(format!(
                "o usuário '{}' já existe",
                username
            )));
        }
        if !email.is_empty() && users.values().any(|user| user.email == email) {
            return Err(RegistryError::Conflict(format!(
                "o e-mail '{}' já está cadastrado",
                email
            )));
        }

        let user = User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
        };
        users.insert(username.to_string(), user);
        self.save(&users)?;
        info!("Registered user '{}'", username);
        Ok(())
    }
}

impl Authenticator for UserDirectory {
    fn verify(&self, username: &str, password: &str) -> Result<bool> {
        match self.users()?.get(username) {
            Some(user) => verify_password(password, &user.password_hash),
            None => Ok(false),
        }
    }
}

/// Hash a password using Argon2id with a random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RegistryError::Internal(format!("falha ao gerar hash da senha: {}", e)))
}

/// Verify a password against a stored hash
///
/// # Errors
/// * `MalformedData` if the stored hash is not a valid PHC string
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| RegistryError::MalformedData("hash de senha inválido".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn registered_user_verifies() {
        let dir = tempdir().unwrap();
        let users = UserDirectory::open(dir.path().join("database/users.json")).unwrap();
        users.register("admin", "admin@example.com", "segredo").unwrap();

        assert!(users.verify("admin", "segredo").unwrap());
        assert!(!users.verify("admin", "errada").unwrap());
        assert!(!users.verify("ninguem", "segredo").unwrap());
    }

    #[test]
    fn passwords_are_not_stored_in_clear() {
        let dir = tempdir().unwrap();
        let users = UserDirectory::open(dir.path().join("users.json")).unwrap();
        users.register("admin", "", "segredo").unwrap();
        let contents = fs::read_to_string(users.path()).unwrap();
        assert!(!contents.contains("segredo"));
        assert!(contents.contains("$argon2"));
    }

    #[test]
    fn duplicate_username_or_email_is_rejected() {
        let dir = tempdir().unwrap();
        let users = UserDirectory::open(dir.path().join("users.json")).unwrap();
        users.register("admin", "admin@example.com", "segredo").unwrap();
        assert!(matches!(
            users.register("admin", "outro@example.com", "x"),
            Err(RegistryError::Conflict(_))
        ));
        assert!(matches!(
            users.register("outro", "admin@example.com", "x"),
            Err(RegistryError::Conflict(_))
        ));
        assert!(matches!(
            users.register("", "", "x"),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn corrupted_hash_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(
            &path,
            r#"{"admin": {"username": "admin", "password_hash": "plain"}}"#,
        )
        .unwrap();
        let users = UserDirectory::open(&path).unwrap();
        assert!(matches!(
            users.verify("admin", "plain"),
            Err(RegistryError::MalformedData(_))
        ));
    }
}
