// remate library: the protocol session engine shared by the binary and tests.

pub mod session;
