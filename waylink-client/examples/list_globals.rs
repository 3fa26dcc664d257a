use waylink_client::Connection;

fn main() {
    env_logger::init();

    let mut conn = Connection::<()>::connect().expect("failed to connect to wayland");
    conn.blocking_roundtrip().expect("initial roundtrip failed");

    let mut globals: Vec<_> = conn.globals().to_vec();
    globals.sort_by_key(|g| g.name);
    for global in globals {
        println!(
            "{:>3}: {} v{}",
            global.name,
            global.interface.to_string_lossy(),
            global.version
        );
    }
}
