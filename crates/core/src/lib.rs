//! VolWare core
//!
//! Platform-agnostic pieces of the slider controller bridge: turning device
//! lines into volume commands and applying them to audio sessions through an
//! abstract audio backend.

pub mod domain;
