#![cfg(not(tarpaulin_include))]

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use structopt::StructOpt;
use unit_registry::login::{Authenticator, UserDirectory};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "registry-users",
    about = "Manages the users allowed to call the registry API."
)]
struct Args {
    /// JSON file of users
    #[structopt(
        long,
        env = "REGISTRY_USERS_FILE",
        default_value = "database/users.json",
        parse(from_os_str)
    )]
    users_file: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Registers a user; the password is read from stdin when not given
    Add {
        username: String,
        #[structopt(long, default_value = "")]
        email: String,
        #[structopt(long, env = "REGISTRY_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Lists registered users
    List,
    /// Checks a username and password
    Check {
        username: String,
        #[structopt(long, env = "REGISTRY_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

fn read_password() -> io::Result<String> {
    print!("Senha: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::from_args();
    let users = UserDirectory::open(&args.users_file)?;

    match args.command {
        Command::Add {
            username,
            email,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            users.register(&username, &email, &password)?;
            println!("Usuário '{}' cadastrado em {}", username, users.path().display());
        }
        Command::List => {
            let mut all: Vec<_> = users.users()?.into_values().collect();
            all.sort_by(|a, b| a.username.cmp(&b.username));
            for user in all {
                println!("{}\t{}", user.username, user.email);
            }
        }
        Command::Check { username, password } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            if users.verify(&username, &password)? {
                println!("Credenciais válidas");
            } else {
                eprintln!("Credenciais inválidas");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
