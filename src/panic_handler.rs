use std::io::{self, Write};
use std::panic;

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Render-worker panics are caught and reported per task; they still
        // reach this hook first, so keep the process alive for those.
        let on_render_worker = std::thread::current()
            .name()
            .is_some_and(|name| name.starts_with(crate::viewer::RENDER_THREAD_NAME));

        log::error!("Panic: {panic_info}");
        default_hook(panic_info);

        if !on_render_worker {
            let _ = writeln!(io::stderr());
            std::process::exit(1);
        }
    }));
}
