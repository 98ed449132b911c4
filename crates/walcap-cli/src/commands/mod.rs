mod check;
mod lsn;
mod setup;
mod tail;

pub use check::cmd_check;
pub use lsn::cmd_lsn;
pub use setup::cmd_setup;
pub use tail::cmd_tail;
