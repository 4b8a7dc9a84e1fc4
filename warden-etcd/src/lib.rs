//! # Warden etcd adapter
//!
//! [`EtcdClient`] implements [`warden_core::CoordinationClient`] on top of the
//! etcd v2 keys HTTP API. Conditional writes use etcd's `prevExist` and
//! `prevValue` preconditions, and etcd error codes are mapped onto
//! [`warden_core::CoordinationError`]:
//!
//! | etcd            | `CoordinationError`   |
//! |-----------------|-----------------------|
//! | 100 key not found | `NotFound`          |
//! | 101 compare failed | `PreconditionFailed` |
//! | 105 node exists | `AlreadyExists`       |
//! | 5xx / transport | `Unavailable`         |
//!
//! ```rust
//! use warden_etcd::{EtcdClient, EtcdConfig};
//!
//! let config = EtcdConfig::from_list("http://10.0.0.1:2379,http://10.0.0.2:2379").unwrap();
//! let client = EtcdClient::new(config).unwrap();
//! assert_eq!(client.endpoints().len(), 2);
//! ```

pub mod client;
pub mod config;
pub mod wire;

pub use client::EtcdClient;
pub use config::{EtcdConfig, EtcdError, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};
