//! A UDP carrier, out of scope per §1. Framing assumes a reliable, ordered byte stream, which
//! UDP does not provide without an additional sequencing layer this crate does not build.

pub struct UdpTransport;

impl super::Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }
}

impl UdpTransport {
    pub fn new() -> Self {
        UdpTransport
    }

    pub async fn connect(&self, _address: &str) -> Result<(), crate::error::TransportError> {
        Err(super::unsupported("udp"))
    }
}
