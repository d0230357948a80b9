fn main() -> std::process::ExitCode {
    dfu_looper_lib::run()
}
