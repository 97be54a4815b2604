// SPDX-License-Identifier: MPL-2.0

//! Client core for HashTribe.
//!
//! [`HashTribe`] wires a [`backend::Backend`] and durable
//! [`storage::StateStorage`] into the auth container and the domain stores.

pub mod app;
pub mod auth;
pub mod backend;
pub mod config;
pub mod models;
pub mod routes;
pub mod slug;
pub mod storage;
pub mod stores;
pub mod validate;


pub use app::HashTribe;
