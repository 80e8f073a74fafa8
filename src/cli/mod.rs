mod scan;
mod similar;

pub use scan::*;
pub use similar::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
