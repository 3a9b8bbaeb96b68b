pub mod ari;
pub mod audiosocket;
pub mod rtp;
pub mod switch;
