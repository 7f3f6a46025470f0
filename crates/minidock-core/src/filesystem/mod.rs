//! Root filesystem switching for container isolation.

pub mod chroot;
