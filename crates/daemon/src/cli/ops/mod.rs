pub mod fetch;
pub mod save;
pub mod serve;
pub mod stat;

pub use fetch::Fetch;
pub use save::Save;
pub use serve::Serve;
pub use stat::Stat;

crate::command_enum! {
    (Serve, Serve),
    (Save, Save),
    (Fetch, Fetch),
    (Stat, Stat),
}
