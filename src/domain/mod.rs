mod budget;
mod category;
mod friend;
mod group;
mod money;
mod settlement;
mod transaction;
mod user;
mod wallet;

pub use budget::*;
pub use category::*;
pub use friend::*;
pub use group::*;
pub use money::*;
pub use settlement::*;
pub use transaction::*;
pub use user::*;
pub use wallet::*;
