use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::all_build()?;
    let cargo = CargoBuilder::all_cargo()?;
    let rustc = RustcBuilder::all_rustc()?;
    let gitcl = GitclBuilder::all_git();

    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&build)?
        .add_instructions(&cargo)?
        .add_instructions(&rustc)?;

    // Release tarballs have no .git, CI passes the values through the environment
    if let Ok(git) = gitcl {
        emitter.add_instructions(&git)?;
    } else {
        for (name, fallback) in [
            ("VERGEN_GIT_SHA", "unknown"),
            ("VERGEN_GIT_BRANCH", "unknown"),
            ("VERGEN_GIT_COMMIT_TIMESTAMP", "unknown"),
            ("VERGEN_GIT_DIRTY", "false"),
        ] {
            println!(
                "cargo::rustc-env={name}={}",
                std::env::var(name).unwrap_or_else(|_| fallback.to_string())
            );
        }
    }

    emitter.emit()?;

    Ok(())
}
