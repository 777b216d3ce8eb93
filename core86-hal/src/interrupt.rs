//! The interrupt-controller contract: the dispatcher polls `next_intr`
//! once per iteration; devices post lines through `doirq`.

pub trait InterruptController {
    /// Posts IRQ line `n`, masked by IMR, exactly as the PIC's `doirq(n)`.
    fn doirq(&mut self, line: u8);

    /// Returns the vector of the highest-priority unmasked pending IRQ,
    /// or `None` if nothing is pending. Mirrors `nextIntr()`.
    fn next_intr(&mut self) -> Option<u8>;
}
