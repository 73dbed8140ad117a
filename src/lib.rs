pub mod core;
pub mod llm;
pub mod page;
pub mod rag;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod storage;
pub mod templates;
