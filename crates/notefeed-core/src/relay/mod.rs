mod connections;

pub use connections::ConnectionManager;
