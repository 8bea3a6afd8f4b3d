pub mod reconnect_delay;
