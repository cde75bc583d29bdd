// Chain types, account accounting and block verification live in separate
// submodules; everything is re-exported from here.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
