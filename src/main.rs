fn main() -> Result<(), Box<dyn std::error::Error>> {
    portal_relay::cli::main()
}
