// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::{info, LevelFilter},
    pdf_remote_signing::{
        codec, CertificateChain, DigestEncoding, RemoteSignError, SessionBuilder,
        SigningSettings,
    },
    std::{
        convert::TryFrom,
        io::{BufRead, Write},
    },
};

const SIGN_ABOUT: &str = "\
Sign a PDF with a key held by a remote signer.

The digest to sign is printed to stdout, one line, in the selected
encoding. Have it signed by the holder of the private key for the
certificate given by --certificate, then enter the raw signature value,
in the same encoding, on stdin. With --signature-file, press enter once
the signature has been written to that file instead.

The output file is only written once a valid signature was supplied.
";

/// Read a certificate file as text.
///
/// Binary DER files are converted to Base64.
fn certificate_text(path: &str) -> Result<String, RemoteSignError> {
    let data = std::fs::read(path)?;

    Ok(match String::from_utf8(data) {
        Ok(text) => text,
        Err(e) => codec::base64_encode(e.as_bytes()).into(),
    })
}

fn read_signature(args: &ArgMatches) -> Result<String, RemoteSignError> {
    let mut line = String::new();

    if let Some(path) = args.value_of("signature_file") {
        eprintln!("press enter once the signature is written to {}", path);
        std::io::stdin().lock().read_line(&mut line)?;

        Ok(std::fs::read_to_string(path)?.trim().to_string())
    } else {
        eprintln!("enter signature:");
        std::io::stdin().lock().read_line(&mut line)?;

        Ok(line.trim().to_string())
    }
}

fn command_print_certificate_chain(args: &ArgMatches) -> Result<(), RemoteSignError> {
    let end_entity = certificate_text(
        args.value_of("certificate")
            .expect("certificate argument is required"),
    )?;
    let chain = args
        .values_of("chain")
        .map(|values| values.map(certificate_text).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    let root = args.value_of("root").map(certificate_text).transpose()?;

    let chain = CertificateChain::resolve(&end_entity, chain.as_slice(), root.as_deref())?;

    println!(
        "signer: {} ({:?})",
        chain.end_entity().subject(),
        chain.signer().key_algorithm
    );
    for (i, cert) in chain.chain().iter().enumerate() {
        println!("chain #{}: {}", i, cert.subject());
    }
    if let Some(root) = chain.root() {
        println!("root: {}", root.subject());
    }

    Ok(())
}

fn command_sign(args: &ArgMatches) -> Result<(), RemoteSignError> {
    let mut settings = SigningSettings::default();

    if let Some(encoding) = args.value_of("encoding") {
        settings.set_digest_encoding(DigestEncoding::try_from(encoding)?);
    }
    if let Some(reason) = args.value_of("reason") {
        settings.set_reason(reason);
    }
    if let Some(location) = args.value_of("location") {
        settings.set_location(location);
    }
    if let Some(contact) = args.value_of("contact_info") {
        settings.set_contact_info(contact);
    }
    if let Some(size) = args.value_of("signature_size") {
        settings.set_signature_size(size.parse::<usize>().map_err(|e| {
            RemoteSignError::CliGeneralError(format!("invalid --signature-size: {}", e))
        })?);
    }

    let mut builder = SessionBuilder::new(
        args.value_of("level").expect("level argument is required"),
        args.value_of("digest_algorithm")
            .expect("digest algorithm argument is required"),
        args.value_of("input").expect("input argument is required"),
        args.value_of("output").expect("output argument is required"),
        certificate_text(
            args.value_of("certificate")
                .expect("certificate argument is required"),
        )?,
    )
    .settings(settings);

    if let Some(values) = args.values_of("chain") {
        for path in values {
            builder = builder.chain_certificate(certificate_text(path)?);
        }
    }
    if let Some(path) = args.value_of("root") {
        builder = builder.root_certificate(certificate_text(path)?);
    }
    if let Some(label) = args.value_of("label") {
        builder = builder.label(label);
    }

    let mut session = builder.build()?;
    info!("{}", session.print_state());

    let digest = session.begin_signing()?;
    {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", digest)?;
        stdout.flush()?;
    }

    let signature = read_signature(args)?;
    session.finish_signing(&signature)?;

    info!(
        "wrote signed document to {}",
        session.config().output_path().display()
    );

    Ok(())
}

fn add_certificate_args(app: Command<'static>) -> Command<'static> {
    app.arg(
        Arg::new("certificate")
            .long("certificate")
            .takes_value(true)
            .required(true)
            .help("Signer certificate file (PEM, DER or Base64)"),
    )
    .arg(
        Arg::new("chain")
            .long("chain")
            .takes_value(true)
            .multiple_occurrences(true)
            .number_of_values(1)
            .help("Issuer certificate file, nearest issuer first. Can be repeated"),
    )
    .arg(
        Arg::new("root")
            .long("root")
            .takes_value(true)
            .help("Root certificate file. Embedded by the LT and LTA levels"),
    )
}

fn main_impl() -> Result<(), RemoteSignError> {
    let app = Command::new("Two-phase PDF signing with a remote signer")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(add_certificate_args(
        Command::new("print-certificate-chain")
            .about("Decode certificate inputs and print what a session would use"),
    ));

    let app = app.subcommand(add_certificate_args(
        Command::new("sign")
            .about("Sign a PDF with a remotely held key")
            .long_about(SIGN_ABOUT)
            .arg(
                Arg::new("level")
                    .long("level")
                    .takes_value(true)
                    .default_value("PAdES-B-B")
                    .help("Conformance level (PAdES-B-B, PAdES-B-T, PAdES-B-LT, PAdES-B-LTA, adbe.pkcs7.detached)"),
            )
            .arg(
                Arg::new("digest_algorithm")
                    .long("digest-algorithm")
                    .takes_value(true)
                    .default_value("2.16.840.1.101.3.4.2.1")
                    .help("OID of the digest algorithm"),
            )
            .arg(
                Arg::new("encoding")
                    .long("encoding")
                    .takes_value(true)
                    .possible_values(["hex", "base64", "urlencoded-base64"])
                    .default_value("hex")
                    .help("Encoding of the printed digest and the entered signature"),
            )
            .arg(
                Arg::new("label")
                    .long("label")
                    .takes_value(true)
                    .help("Signer name recorded in the signature dictionary"),
            )
            .arg(
                Arg::new("reason")
                    .long("reason")
                    .takes_value(true)
                    .help("Reason for signing"),
            )
            .arg(
                Arg::new("location")
                    .long("location")
                    .takes_value(true)
                    .help("Location of signing"),
            )
            .arg(
                Arg::new("contact_info")
                    .long("contact-info")
                    .takes_value(true)
                    .help("Contact information of the signer"),
            )
            .arg(
                Arg::new("signature_size")
                    .long("signature-size")
                    .takes_value(true)
                    .help("Bytes to reserve for the signature envelope"),
            )
            .arg(
                Arg::new("signature_file")
                    .long("signature-file")
                    .takes_value(true)
                    .help("Read the signature from this file instead of stdin"),
            )
            .arg(
                Arg::new("input")
                    .required(true)
                    .help("PDF file to sign"),
            )
            .arg(
                Arg::new("output")
                    .required(true)
                    .help("Where to write the signed PDF"),
            ),
    ));

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("print-certificate-chain", args)) => command_print_certificate_chain(args),
        Some(("sign", args)) => command_sign(args),
        _ => Err(RemoteSignError::CliGeneralError("unknown command".into())),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
