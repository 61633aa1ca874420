// Database schema for the ledger store.

pub const LEDGER_SCHEMA: &str = include_str!("../../migrations/001_ledger.sql");
