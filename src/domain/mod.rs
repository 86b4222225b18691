mod branch;
mod ledger;
mod money;
mod overrides;
mod period;
mod pnl;
mod variance;

pub use branch::*;
pub use ledger::*;
pub use money::*;
pub use overrides::*;
pub use period::*;
pub use pnl::*;
pub use variance::*;
