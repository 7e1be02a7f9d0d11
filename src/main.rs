fn main() -> std::process::ExitCode {
    hellas_launcher_lib::run()
}
