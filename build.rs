use std::env;

fn main() {
    println!("cargo:rerun-if-changed=kernels");
    println!("cargo:rerun-if-env-changed=ROCM_PATH");
    println!("cargo:rerun-if-env-changed=HIPCC");
    println!("cargo:rerun-if-env-changed=ROCm_ARCH");

    // The host platform needs nothing from ROCm
    if env::var_os("CARGO_FEATURE_ROCM").is_none() {
        return;
    }

    let rocm_root = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string());
    println!("cargo:rustc-link-search=native={}/lib", rocm_root);
    println!("cargo:rustc-link-lib=dylib=amdhip64");

    compile_hip_kernels(&rocm_root);
}

fn compile_hip_kernels(rocm_root: &str) {
    use std::path::{Path, PathBuf};
    use std::process::Command;

    let hipcc = env::var("HIPCC").unwrap_or_else(|_| format!("{}/bin/hipcc", rocm_root));

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            println!("cargo:warning=OUT_DIR not set. Skipping kernel compilation.");
            return;
        }
    };

    if !Path::new(&hipcc).exists() {
        println!(
            "cargo:warning=hipcc not found at {}. Skipping kernel compilation.",
            hipcc
        );
        return;
    }

    // Comma separated list, e.g. "gfx90a,gfx942"
    let target_archs = env::var("ROCm_ARCH").unwrap_or_else(|_| "gfx90a,gfx942".to_string());

    // (source_file, env_var_name, output_stem)
    let kernels = [("kernels/transfer.hip", "TRANSFER_KERNEL_HSACO", "transfer_kernel")];

    for (src_file, env_name, stem) in &kernels {
        if !Path::new(src_file).exists() {
            println!("cargo:warning=Kernel source not found: {}", src_file);
            continue;
        }

        let hsaco_path = out_dir.join(format!("{}.hsaco", stem));

        let mut cmd = Command::new(&hipcc);
        cmd.arg("-c").arg("--genco").arg("-O3");
        for arch in target_archs.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            cmd.arg(format!("--offload-arch={}", arch));
        }
        cmd.arg(src_file).arg("-o").arg(&hsaco_path);

        match cmd.status() {
            Ok(status) if status.success() => {
                println!("cargo:rustc-env={}={}", env_name, hsaco_path.display());
            }
            Ok(status) => {
                println!(
                    "cargo:warning=Failed to compile {}: exit code {:?}",
                    src_file,
                    status.code()
                );
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to execute hipcc for {}: {:?}",
                    src_file, e
                );
            }
        }
    }
}
