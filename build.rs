use vergen::EmitBuilder;

fn main() {
    // 启动日志中展示构建时间和 git 提交
    if let Err(e) = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit()
    {
        println!("cargo:warning=无法生成构建信息: {}", e);
    }
}
