pub mod backends;
pub mod disassembler;
pub mod filter;
pub mod provider;
pub mod reader;
pub mod stubs;
pub mod symbols;
pub mod traversal;
