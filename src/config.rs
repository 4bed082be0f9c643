//! Command-line and environment configuration.
//!
//! Parsed once at startup into an immutable [`Config`]; nothing reads the environment
//! after that.

use log::LevelFilter;
use std::path::PathBuf;
use structopt::StructOpt;

#[cfg(feature = "web")]
use crate::mailer::{MailSettings, TlsMode};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "registry-web",
    about = "Registers facility units and exports them as spreadsheets."
)]
pub struct Config {
    /// Address the web server listens on
    #[structopt(long, env = "REGISTRY_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// JSON file holding localities and units
    #[structopt(
        long,
        env = "REGISTRY_DATA_FILE",
        default_value = "database/dados.json",
        parse(from_os_str)
    )]
    pub data_file: PathBuf,

    /// JSON file of users; when set, API routes require HTTP Basic credentials
    #[structopt(long, env = "REGISTRY_USERS_FILE", parse(from_os_str))]
    pub users_file: Option<PathBuf>,

    /// Minimum log level (overrides RUST_LOG)
    #[structopt(long, default_value = "info")]
    pub log_level: LevelFilter,

    #[structopt(flatten)]
    pub mail: MailOptions,
}

#[derive(Debug, Clone, StructOpt)]
pub struct MailOptions {
    /// SMTP relay host
    #[structopt(long, env = "SMTP_HOST", default_value = "smtp.gmail.com")]
    pub smtp_host: String,

    /// SMTP port, defaults to the TLS mode's standard port
    #[structopt(long, env = "SMTP_PORT")]
    pub smtp_port: Option<u16>,

    /// `starttls` or `wrapper`
    #[structopt(long, env = "SMTP_TLS", default_value = "starttls")]
    pub smtp_tls: String,

    /// SMTP login
    #[structopt(long, env = "EMAIL_USUARIO", hide_env_values = true)]
    pub mail_user: Option<String>,

    /// SMTP password
    #[structopt(long, env = "EMAIL_SENHA", hide_env_values = true)]
    pub mail_password: Option<String>,

    /// Sender mailbox, defaults to the SMTP login
    #[structopt(long, env = "EMAIL_REMETENTE")]
    pub mail_from: Option<String>,

    /// Comma separated list of recipients of exported spreadsheets
    #[structopt(long, env = "EMAIL_DESTINO", use_delimiter = true)]
    pub mail_to: Vec<String>,
}

#[cfg(feature = "web")]
impl MailOptions {
    /// Mail settings, or `None` when the login, password or recipients are missing.
    ///
    /// # Errors
    /// * an unknown `--smtp-tls` value
    pub fn settings(&self) -> Result<Option<MailSettings>, String> {
        let tls: TlsMode = self.smtp_tls.parse()?;
        let recipients: Vec<String> = self
            .mail_to
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        let (Some(username), Some(password)) = (&self.mail_user, &self.mail_password) else {
            return Ok(None);
        };
        if username.is_empty() || recipients.is_empty() {
            return Ok(None);
        }

        Ok(Some(MailSettings {
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            tls,
            username: username.clone(),
            password: password.clone(),
            from: self.mail_from.clone().unwrap_or_else(|| username.clone()),
            recipients,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["registry-web"];
        argv.extend_from_slice(args);
        Config::from_iter_safe(argv).unwrap()
    }

    #[test]
    fn explicit_flags_are_parsed() {
        let config = parse(&[
            "--bind",
            "0.0.0.0:8080",
            "--data-file",
            "/tmp/dados.json",
            "--log-level",
            "debug",
        ]);
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.data_file, PathBuf::from("/tmp/dados.json"));
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[cfg(feature = "web")]
    #[test]
    fn mail_requires_login_and_recipients() {
        let config = parse(&[
            "--mail-user",
            "cadastro@example.com",
            "--mail-password",
            "segredo",
            "--mail-to",
            "a@example.com, b@example.com",
            "--smtp-tls",
            "wrapper",
        ]);
        let settings = config.mail.settings().unwrap().unwrap();
        assert_eq!(settings.recipients, vec!["a@example.com", "b@example.com"]);
        assert_eq!(settings.from, "cadastro@example.com");
        assert_eq!(settings.tls, TlsMode::Wrapper);

        let mut missing = config.mail.clone();
        missing.mail_to.clear();
        assert!(missing.settings().unwrap().is_none());

        let mut bad_tls = config.mail.clone();
        bad_tls.smtp_tls = "plain".to_string();
        assert!(bad_tls.settings().is_err());
    }
}
