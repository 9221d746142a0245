//! Operator tool: generates the salted auth blob stored in Accounts.Auth.
//! Prints the hash and salt in hex; the database stores hash || salt.

use querymanager::network::crypt;
use rand::RngCore;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() <= 1 {
        println!("usage: pwdhash PASSWORD");
        return;
    }

    let password = &args[1];
    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);

    let pwdhash = crypt::hash_password(password, &salt);

    println!("password = \"{}\"", password);
    println!("pwdhash = {}", hex::encode(pwdhash));
    println!("salt    = {}", hex::encode(salt));
}
