mod routes;
mod shell;

pub use routes::{print_reverse_routes, print_routes, print_simulation};
pub use shell::{print_messages, shell};
