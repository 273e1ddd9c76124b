use argon2::{Argon2, PasswordHasher};
use argon2::password_hash::{SaltString, rand_core::OsRng};

/// Bootstrap helper: prints an Argon2id PHC string for vet_user.password_hash,
/// plus a ready-to-run INSERT when a username is given.
fn main() {
    let mut args = std::env::args().skip(1);
    let password = args.next().expect("Usage: hashpass <password> [username]");
    let username = args.next();

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string();

    match username {
        Some(username) => println!(
            "INSERT INTO vet_user (username, display_name, password_hash, roles) \
             VALUES ('{username}', '{username}', '{phc}', 1);"
        ),
        None => println!("{phc}"),
    }
}
