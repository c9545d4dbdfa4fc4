// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Core primitives for building a derivative Debian-style distribution.

This crate implements the machinery behind a derivative-distribution
builder: given a set of *seed* packages and an upstream archive, compute
the transitive dependency closure, map it onto source packages, fetch and
verify their files, build each source in an isolated container, and
deposit the artifacts in a local repository.

# A Tour of Functionality

Control file primitives live in [control]: [control::ControlParagraph] is
an ordered set of fields, [control::ControlParagraphReader] streams
paragraphs out of `Packages`/`Sources` indices.

The relation meta language (`libc6 (>= 2.4), awk | mawk`) is parsed by
[dependency]; Debian version ordering and the relational operators are in
[package_version].

[archive] speaks the upstream archive protocol: [archive::IndexStore]
acquires the `[In]Release` manifest, verifies and caches the referenced
control files, and splits them into records. Transport is pluggable via
[archive::ArchiveClient]; [archive::http::HttpArchiveClient] and
[archive::filesystem::FilesystemArchiveClient] are the concrete clients.

Typed record views are [binary_package::BinaryPackage] and
[source_package::SourcePackage]. [cache::PackageCache] indexes them by
name and by provided (virtual) name.

[resolver::Resolver] computes the closure for a seed set, producing a
[resolver::ResolutionSet]; [planner::plan_sources] maps the closure onto
source packages and a download manifest; [fetcher::SourceFetcher]
materializes the manifest with an MD5 skip gate; [builder::PackageBuilder]
drives containerized builds through a [container::ContainerDriver] into a
[repository::LocalRepository].

[deb] holds the deb-archive well-formedness predicate that gates
"already built" decisions, and [cancel::CancelFlag] threads cooperative
cancellation through the fetch and build phases.
*/

pub mod architecture;
pub mod archive;
pub mod binary_package;
pub mod builder;
pub mod cache;
pub mod cancel;
pub mod container;
pub mod control;
pub mod deb;
pub mod dependency;
pub mod error;
pub mod fetcher;
pub mod io;
pub mod package_version;
pub mod planner;
pub mod repository;
pub mod resolver;
pub mod source_package;

#[cfg(test)]
pub(crate) mod testutil {
    use crate::error::Result;

    /// Write a minimal well-formed `.deb` file for tests.
    pub(crate) fn write_minimal_deb(path: &std::path::Path) -> Result<()> {
        let f = std::fs::File::create(path)?;
        let mut builder = ar::Builder::new(f);

        for (name, content) in [
            ("debian-binary", b"2.0\n".as_slice()),
            ("control.tar.gz", b"fake control tarball".as_slice()),
            ("data.tar.xz", b"fake data tarball!".as_slice()),
        ] {
            let mut header = ar::Header::new(name.as_bytes().to_vec(), content.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);

            builder.append(&header, content)?;
        }

        Ok(())
    }
}
