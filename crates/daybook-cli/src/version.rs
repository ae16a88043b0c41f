/// Version line for `daybook version`: binary version plus the engine it
/// was built against.
pub fn full() -> String {
    let cli = env!("CARGO_PKG_VERSION");
    let core = daybook_core::version();
    if cli == core {
        cli.to_string()
    } else {
        format!("{cli} (core {core})")
    }
}

#[cfg(test)]
mod tests {
    use super::full;

    #[test]
    fn version_starts_with_package_version() {
        assert!(full().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
