//! CNAB Relocation CLI - copy bundle images to another registry.

pub mod commands;
