// Multitrack Output Library
// Go-live config client, output builder, session controller and FLV muxer

pub mod commands;
pub mod models;
pub mod services;
