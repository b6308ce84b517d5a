//! The `stepcode init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    // Create stepcode.toml
    if std::path::Path::new("stepcode.toml").exists() {
        println!("stepcode.toml already exists, skipping.");
    } else {
        std::fs::write("stepcode.toml", SAMPLE_CONFIG)?;
        println!("Created stepcode.toml");
    }

    // Create example assignment
    std::fs::create_dir_all("assignments")?;
    let example_path = std::path::Path::new("assignments/hello-python.toml");
    if example_path.exists() {
        println!("assignments/hello-python.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_ASSIGNMENT)?;
        println!("Created assignments/hello-python.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit stepcode.toml to choose a sandbox and add users");
    println!("  2. Run: stepcode validate --assignments assignments/hello-python.toml");
    println!("  3. Run: stepcode run --assignment hello-python --solutions solutions --user alice");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# stepcode configuration

assignments_dir = "assignments"
progress_dir = ".stepcode/progress"
provision_timeout_secs = 120
run_timeout_secs = 30

# Run code with the interpreters installed on this machine.
[sandbox]
type = "local"
python = "python3"

# Or use the remote code-execution API:
# [sandbox]
# type = "remote"
# base_url = "${STEPCODE_EXECUTION_URL}"

[users.alice]
role = "student"
token = "${ALICE_TOKEN}"

[users.prof]
role = "teacher"
"#;

const EXAMPLE_ASSIGNMENT: &str = r#"[assignment]
id = "hello-python"
title = "Hello, Python"
description = "Print text and do simple arithmetic"
course = "Python Basics"
difficulty = "beginner"
estimated_time = "10 minutes"
language = "python"

[[modules]]
id = "greeting"
title = "Say hello"
instructions = """
Print exactly `Hello, World!`.
"""
starter_code = """
# <editable>
print("...")
# </editable>
"""
hints = ["Use the print function.", "Mind the comma and the exclamation mark."]
expected_output = "Hello, World!"

[[modules]]
id = "sum"
title = "Add two numbers"
instructions = """
Print the sum of 19 and 23.
"""
starter_code = """
a = 19
b = 23
# <editable>
# </editable>
"""
hints = ["print(a + b)"]
expected_output = "42"

[[modules]]
id = "explore"
title = "Free play"
instructions = """
Experiment with anything you like. This module is not graded.
"""
starter_code = ""
"#;
