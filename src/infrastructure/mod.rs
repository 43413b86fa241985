pub mod opencode;
