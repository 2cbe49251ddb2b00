use core::panic::PanicInfo;

use crate::hal::cpu;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(location) = info.location() {
        error!(
            "Panicked at {}:{} {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        error!("Panicked: {}", info.message());
    }

    cpu::disable_irqs();
    loop {
        cpu::wait_for_irqs();
    }
}
