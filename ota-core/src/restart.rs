/// Delay and reboot primitives.
pub trait Restart {
    fn delay_ms(&mut self, ms: u32);

    /// Reboot the device. Hardware implementations never return; if a
    /// simulated one does, the server goes back to accepting connections.
    fn restart(&mut self);
}
