//! HTTP surface in front of the watch registry: intent registration and
//! lookup on the public listener, settlement requeue and metrics on the
//! internal one.

mod application;
mod handlers;
mod state;


use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    if let Err(err) = application::run().await {
        eprintln!("[api] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}
