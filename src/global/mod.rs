pub mod jil;
