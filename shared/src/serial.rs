use core::fmt;

#[cfg(target_os = "none")]
pub use uart::{SerialWriter, SERIAL_WRITER};

#[cfg(target_os = "none")]
mod uart {
    use core::fmt;
    use core::ptr::{read_volatile, write_volatile};

    // 16550-compatible UART as exposed by the QEMU virt board.
    const UART_BASE: usize = 0x1000_0000;

    const THR: usize = 0; // Transmitter Holding Reg (write-only)
    const IER: usize = 1; // Interrupt Enable Reg
    const FCR: usize = 2; // FIFO Control Reg (write-only)
    const LCR: usize = 3; // Line Control Register
    const LSR: usize = 5; // Line Status Register (read-only)

    const LSR_TX_IDLE: u8 = 1 << 5;

    pub struct SerialWriter {
        base: usize,
        initialized: bool,
    }

    impl SerialWriter {
        pub const fn new(base: usize) -> Self {
            Self {
                base,
                initialized: false,
            }
        }

        unsafe fn write_reg(&self, reg: usize, value: u8) {
            write_volatile((self.base + reg) as *mut u8, value);
        }

        unsafe fn read_reg(&self, reg: usize) -> u8 {
            read_volatile((self.base + reg) as *const u8)
        }

        fn ensure_initialized(&mut self) {
            if self.initialized {
                return;
            }

            // SAFETY: `base` points at the UART register window.
            unsafe {
                self.write_reg(IER, 0x00);
                self.write_reg(LCR, 0x80); // Baud latch.
                self.write_reg(THR, 0x03); // 38.4K baud, LSB.
                self.write_reg(IER, 0x00); // MSB.
                self.write_reg(LCR, 0x03); // 8 bits, no parity.
                self.write_reg(FCR, 0x07); // Reset and enable FIFOs.
            }

            self.initialized = true;
        }
    }

    impl fmt::Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.ensure_initialized();

            for b in s.bytes() {
                // SAFETY: Waits for the transmit holding register to drain first.
                unsafe {
                    while self.read_reg(LSR) & LSR_TX_IDLE == 0 {
                        core::hint::spin_loop();
                    }
                    self.write_reg(THR, b);
                }
            }

            Ok(())
        }
    }

    pub static mut SERIAL_WRITER: SerialWriter = SerialWriter::new(UART_BASE);
}

#[doc(hidden)]
#[cfg(target_os = "none")]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    // SAFETY: Console output happens with interrupts held by the caller's
    // trap context; there is a single writer.
    unsafe {
        let _ = (*core::ptr::addr_of_mut!(SERIAL_WRITER)).write_fmt(args);
    }
}

#[doc(hidden)]
#[cfg(target_os = "none")]
pub fn _eprint(args: fmt::Arguments) {
    _print(args);
}

#[doc(hidden)]
#[cfg(not(target_os = "none"))]
pub fn _print(args: fmt::Arguments) {
    std::print!("{args}");
}

#[doc(hidden)]
#[cfg(not(target_os = "none"))]
pub fn _eprint(args: fmt::Arguments) {
    std::eprint!("{args}");
}
