pub mod history;
pub mod users;

pub use history::HistoryRepository;
pub use users::UserRepository;
