use assert_cmd::Command;

pub fn evolvd_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("evolvd").expect("evolvd test binary should build")
    }
}
