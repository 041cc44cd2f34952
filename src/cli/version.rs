/// Display version information
pub fn execute() {
    println!("cordon {}", env!("CARGO_PKG_VERSION"));
    println!("Operator CLI for the Cordon conflict enforcement engine");
}
