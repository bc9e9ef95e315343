use windows::Win32::System::Console::{
    GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, ENABLE_PROCESSED_OUTPUT,
    ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_ERROR_HANDLE, STD_HANDLE, STD_OUTPUT_HANDLE,
};

fn enable_virtual_terminal(stream: STD_HANDLE) -> windows::core::Result<()> {
    unsafe {
        let console = GetStdHandle(stream)?;

        let mut mode = CONSOLE_MODE::default();
        GetConsoleMode(console, &mut mode)?;

        SetConsoleMode(
            console,
            mode | ENABLE_PROCESSED_OUTPUT | ENABLE_VIRTUAL_TERMINAL_PROCESSING,
        )
    }
}

/// Let the console interpret ANSI escape codes on both output streams. Logs go to stderr and
/// command output to stdout.
pub fn enable_ansi() -> color_eyre::Result<()> {
    enable_virtual_terminal(STD_OUTPUT_HANDLE)?;
    enable_virtual_terminal(STD_ERROR_HANDLE)?;

    Ok(())
}
