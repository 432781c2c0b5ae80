mod socket;

pub(crate) use socket::{Socket, TlsParams};
