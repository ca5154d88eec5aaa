pub mod candle_repository;
pub mod database;
pub mod filtered_stock_repository;
pub mod group_repository;
pub mod master_data_repository;

pub use database::Database;
