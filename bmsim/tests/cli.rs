/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Tests of the `bmsim` command.

use anyhow::{anyhow, Result};
use std::process::Command;

fn bmsim<I, S>(args: I) -> Result<(bool, String, String)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new(env!("CARGO_BIN_EXE_bmsim"))
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .args(args)
        .output()?;
    Ok((output.status.success(),
        String::from_utf8(output.stdout)?,
        String::from_utf8(output.stderr)?))
}

#[test]
fn forwards_packets() -> Result<()> {
    let (ok, stdout, _) = bmsim(["tests/p4/ping.json", "--port", "3", "0000007d", "000000ffaabb"])?;
    assert!(ok);
    assert_eq!(stdout, "3 0000007e\n3 00000100aabb\n");
    Ok(())
}

#[test]
fn installs_entries() -> Result<()> {
    let (ok, stdout, _) = bmsim(["tests/p4/ping.json", "--entries", "tests/p4/ping-entries.json",
                                 "00000004", "00000007", "00000001"])?;
    assert!(ok);
    assert_eq!(stdout, "7 00000008\n0 00000002\n");
    Ok(())
}

#[test]
fn reports_errors() -> Result<()> {
    let (ok, _, stderr) = bmsim(["tests/p4/ping.json", "0000"])?;
    assert!(!ok);
    if !stderr.contains("packet too short") {
        return Err(anyhow!("unexpected error output: {stderr}"));
    }

    let (ok, _, stderr) = bmsim(["tests/p4/missing.json"])?;
    assert!(!ok);
    assert!(stderr.contains("could not load tests/p4/missing.json"));
    Ok(())
}
