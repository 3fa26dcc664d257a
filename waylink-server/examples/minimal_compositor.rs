//! A do-nothing compositor: accepts clients, tracks surfaces, prints commits.

use waylink_server::{Hooks, Server};

fn main() {
    env_logger::init();

    let mut server = Server::listen().expect("failed to bind the compositor socket");
    server.set_hooks(Hooks {
        on_surface_commit: Box::new(|client, id, state| {
            println!(
                "client {}: surface {} committed ({} damage rects)",
                client.0,
                id.as_u32(),
                state.current.damage.len()
            );
        }),
        ..Hooks::default()
    });
    server.add_compositor_global();

    println!("listening on {}", server.socket_path().display());
    if let Err(err) = server.accept_loop() {
        eprintln!("accept loop failed: {err}");
    }
}
