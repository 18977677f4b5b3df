use std::net::Ipv4Addr;

use rand::rngs::mock::StepRng;

use spa_client::access;
use spa_client::assembler::{self, TokenPlan};
use spa_client::config::AllowSource;
use spa_client::dns_resolver::StaticResolver;
use spa_client::engine::{DecodeParams, EncryptionMode, MessageType, RandMode};
use spa_client::exit::{self, ExitStatus};
use spa_client::keys;
use spa_client::message_type;
use spa_client::nat;
use spa_client::prompt::ReaderPrompt;
use spa_client::verify::{self, Verification};
use spa_client::{ClientOptions, EncodingContext, KeyMaterial, SpaContext};

const ALLOW: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);

fn base_options() -> ClientOptions {
    ClientOptions {
        spa_server: "203.0.113.9".to_string(),
        allow: AllowSource::Explicit(ALLOW),
        access: Some("tcp/22".to_string()),
        key: Some("secret".to_string()),
        test: true,
        ..ClientOptions::default()
    }
}

/// Runs the assembly pipeline the way a client run does and returns the
/// sealed context.
async fn assemble(opts: &ClientOptions, keys: &mut KeyMaterial) -> (SpaContext, String) {
    let resolver = StaticResolver::new();
    let desc = access::build(opts, ALLOW, &mut StepRng::new(42, 1)).unwrap();
    let nat = nat::build(opts, &desc, &resolver).await.unwrap();
    let plan = TokenPlan {
        message_type: message_type::select_for(opts),
        access: &desc,
        nat_access: nat.as_ref().map(|n| n.value.as_str()),
    };

    let mut ctx = SpaContext::new().unwrap();
    assembler::configure(&mut ctx, opts, &plan).unwrap();
    let use_hmac = keys::acquire_keys(opts, keys, &mut ReaderPrompt::new(&b""[..])).unwrap();
    assembler::finalize(&mut ctx, opts, keys, use_hmac).unwrap();
    (ctx, desc.as_str().to_string())
}

#[tokio::test]
async fn access_request_round_trips() {
    let opts = base_options();
    let mut keys = KeyMaterial::new();
    let (ctx, message) = assemble(&opts, &mut keys).await;

    assert_eq!(message, "1.2.3.4,tcp/22");
    assert_eq!(ctx.message_type(), MessageType::Access);
    match verify::verify_round_trip(&ctx, &opts, &keys, &message).unwrap() {
        Verification::Decoded { message, dump } => {
            assert_eq!(message, "1.2.3.4,tcp/22");
            assert!(dump.unwrap().contains("Access msg"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn nat_request_carries_the_translated_target() {
    let opts = ClientOptions {
        nat_access: Some("192.168.10.3:2222".to_string()),
        fw_timeout: Some(30),
        hmac_key: Some("an hmac key".to_string()),
        use_hmac: true,
        ..base_options()
    };
    let mut keys = KeyMaterial::new();
    let (ctx, _) = assemble(&opts, &mut keys).await;
    assert_eq!(ctx.message_type(), MessageType::NatAccessWithTimeout);

    let params = DecodeParams {
        encryption_mode: EncryptionMode::Cbc,
        hmac_key: keys.hmac_key.as_bytes(),
        hmac_type: Some(opts.hmac_type),
        rand_mode: RandMode::Full,
    };
    let mut decoder = ctx.new_decoder(ctx.spa_data().unwrap(), params).unwrap();
    decoder.decrypt(keys.encryption_key.as_bytes()).unwrap();
    assert_eq!(decoder.message(), Some("1.2.3.4,tcp/22"));
    assert_eq!(decoder.nat_access(), Some("192.168.10.3,2222"));
    assert_eq!(decoder.client_timeout(), Some(30));
}

#[tokio::test]
async fn command_request_round_trips() {
    let opts = ClientOptions {
        access: None,
        server_command: Some("uptime".to_string()),
        ..base_options()
    };
    let mut keys = KeyMaterial::new();
    let (ctx, message) = assemble(&opts, &mut keys).await;
    assert_eq!(message, "1.2.3.4,uptime");
    assert_eq!(ctx.message_type(), MessageType::Command);
    assert!(matches!(
        verify::verify_round_trip(&ctx, &opts, &keys, &message).unwrap(),
        Verification::Decoded { .. }
    ));
}

#[tokio::test]
async fn exit_funnel_leaves_nothing_behind() {
    let mut opts = ClientOptions {
        hmac_key: Some("an hmac key".to_string()),
        ..base_options()
    };
    let mut keys = KeyMaterial::new();
    let (mut ctx, _) = assemble(&opts, &mut keys).await;
    assert!(!keys.hmac_key.is_empty());

    let status = exit::clean_exit(Some(&mut ctx), &mut opts, &mut keys, ExitStatus::Success);
    assert_eq!(status, ExitStatus::Success);
    assert!(keys.encryption_key.is_zeroed());
    assert!(keys.hmac_key.is_zeroed());
    assert!(!opts.holds_secrets());
    assert_eq!(ctx.message(), None);
}
