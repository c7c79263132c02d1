mod booking;
mod common;
