fn main() -> std::process::ExitCode {
    drivecopy_lib::run()
}
